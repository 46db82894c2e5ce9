//! Inference engine: encoder, schema, model and threshold behind one service
//! object that is built once at startup and shared read-only by handlers.

use crate::config::AppConfig;
use crate::error::{ArtifactError, DecodeError, PredictError};
use crate::feature_encoder::{FeatureEncoder, FeatureSchema, FeatureVector};
use crate::models::loader::{self, ArtifactKind, ArtifactLoader};
use crate::models::ChurnModel;
use crate::types::customer::CustomerRecord;
use crate::types::prediction::PredictionResult;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Everything needed to turn a raw customer record into a labelled prediction
pub struct InferenceEngine {
    model: Box<dyn ChurnModel>,
    schema: FeatureSchema,
    encoder: FeatureEncoder,
    threshold: f64,
    model_path: Option<PathBuf>,
}

impl InferenceEngine {
    /// Assemble an engine from already-loaded parts
    pub fn new(
        model: Box<dyn ChurnModel>,
        schema: FeatureSchema,
        encoder: FeatureEncoder,
        threshold: f64,
    ) -> Result<Self, DecodeError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DecodeError::InvalidThreshold(threshold));
        }
        Ok(Self {
            model,
            schema,
            encoder,
            threshold,
            model_path: None,
        })
    }

    /// Resolve and load every artifact named in the configuration.
    ///
    /// The schema is loaded first because the tree backend resolves its split
    /// features against it. A tuned threshold overrides
    /// `decision.threshold` when its artifact resolves.
    pub async fn init(config: &AppConfig) -> Result<Self, ArtifactError> {
        let artifacts = &config.artifacts;
        let loader = ArtifactLoader::new(
            &artifacts.cache_dir,
            Duration::from_secs(artifacts.download_timeout_secs),
        );

        let schema_path = loader.resolve(ArtifactKind::Schema, &artifacts.schema).await?;
        let schema = loader::load_schema(&schema_path)?;

        let model_path = loader.resolve(ArtifactKind::Model, &artifacts.model).await?;
        let model = loader::load_model(&model_path, &schema, artifacts.onnx_threads)?;

        let threshold = match &artifacts.threshold {
            Some(source) => match loader.resolve_optional(ArtifactKind::Threshold, source).await {
                Some(path) => loader::load_threshold(&path)?,
                None => config.decision.threshold,
            },
            None => config.decision.threshold,
        };

        let encoder = FeatureEncoder::with_strict(config.encoding.strict);

        info!(
            model = %model.name(),
            features = schema.len(),
            threshold = threshold,
            strict = encoder.is_strict(),
            "Inference engine initialized"
        );

        Ok(Self {
            model,
            schema,
            encoder,
            threshold,
            model_path: Some(model_path),
        })
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Resolved model location, when the engine was built from configuration
    pub fn model_path(&self) -> Option<&PathBuf> {
        self.model_path.as_ref()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Encode a record against the engine's schema
    pub fn encode(&self, record: &CustomerRecord) -> Result<FeatureVector, PredictError> {
        Ok(self.encoder.encode(record, &self.schema)?)
    }

    /// Raw churn probability for a record
    pub fn score(&self, record: &CustomerRecord) -> Result<f64, PredictError> {
        let features = self.encode(record)?;
        Ok(self.model.predict_proba(&features)?)
    }

    /// Encode, score and label a single record
    pub fn predict(&self, record: &CustomerRecord) -> Result<PredictionResult, PredictError> {
        let probability = self.score(record)?;
        let result = FeatureEncoder::decode(probability, self.threshold)?;

        debug!(
            probability = result.probability,
            label = %result.label,
            "Prediction complete"
        );
        Ok(result)
    }

    /// Predict for several records; one result per record, in order
    pub fn predict_batch(
        &self,
        records: &[CustomerRecord],
    ) -> Vec<Result<PredictionResult, PredictError>> {
        records.iter().map(|r| self.predict(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodingError;
    use crate::types::ChurnLabel;
    use anyhow::Result;

    /// Returns a fixed probability regardless of input.
    struct ConstantModel(f64);

    impl ChurnModel for ConstantModel {
        fn name(&self) -> &str {
            "constant"
        }

        fn predict_proba(&self, _features: &FeatureVector) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn engine(probability: f64, threshold: f64) -> InferenceEngine {
        let schema = FeatureSchema::new(vec!["tenure".into(), "TotalCharges".into()]).unwrap();
        InferenceEngine::new(
            Box::new(ConstantModel(probability)),
            schema,
            FeatureEncoder::new(),
            threshold,
        )
        .unwrap()
    }

    #[test]
    fn test_predict_applies_threshold() {
        let record = CustomerRecord::new().with("tenure", 1);
        let result = engine(0.6123, 0.61).predict(&record).unwrap();
        assert_eq!(result.probability, 0.612);
        assert_eq!(result.label, ChurnLabel::Churn);
        assert_eq!(result.threshold, 0.61);

        let result = engine(0.6123, 0.7).predict(&record).unwrap();
        assert_eq!(result.label, ChurnLabel::NoChurn);
    }

    #[test]
    fn test_encoding_failure_propagates() {
        let record = CustomerRecord::new().with("TotalCharges", "n/a");
        match engine(0.2, 0.5).predict(&record) {
            Err(PredictError::Encoding(EncodingError::NonNumeric { columns })) => {
                assert_eq!(columns, vec!["TotalCharges".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_model_output_is_rejected() {
        let record = CustomerRecord::new();
        let err = engine(1.2, 0.5).predict(&record).unwrap_err();
        assert!(matches!(
            err,
            PredictError::Decode(DecodeError::InvalidProbability(_))
        ));
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn test_batch_keeps_order() {
        let records = vec![
            CustomerRecord::new().with("tenure", 2),
            CustomerRecord::new().with("tenure", "two"),
        ];
        let results = engine(0.3, 0.5).predict_batch(&records);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let schema = FeatureSchema::default();
        let result = InferenceEngine::new(
            Box::new(ConstantModel(0.5)),
            schema,
            FeatureEncoder::new(),
            1.01,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_init_from_config_with_tree_dump() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("feature_names.json");
        let model_path = dir.path().join("churn_model.json");
        let threshold_path = dir.path().join("optimal_threshold.json");
        std::fs::write(&schema_path, r#"["tenure", "MonthlyCharges"]"#).unwrap();
        std::fs::write(
            &model_path,
            r#"[{ "nodeid": 0, "split": "tenure", "split_condition": 6.0,
                  "yes": 1, "no": 2, "missing": 1,
                  "children": [{ "nodeid": 1, "leaf": 1.5 }, { "nodeid": 2, "leaf": -1.5 }] }]"#,
        )
        .unwrap();
        std::fs::write(&threshold_path, r#"{"threshold": 0.42}"#).unwrap();

        let mut config = AppConfig::default();
        config.artifacts.schema = crate::config::ArtifactSource::local(&schema_path);
        config.artifacts.model = crate::config::ArtifactSource {
            path: dir.path().join("churn_model.onnx"),
            fallback_path: Some(model_path.clone()),
            remote_url: None,
        };
        config.artifacts.threshold = Some(crate::config::ArtifactSource::local(&threshold_path));

        let engine = InferenceEngine::init(&config).await.unwrap();
        assert_eq!(engine.threshold(), 0.42);
        assert_eq!(engine.model_path(), Some(&model_path));
        assert_eq!(engine.schema().len(), 2);

        let short = engine
            .predict(&CustomerRecord::new().with("tenure", 2))
            .unwrap();
        assert_eq!(short.label, ChurnLabel::Churn);
        let long = engine
            .predict(&CustomerRecord::new().with("tenure", 40))
            .unwrap();
        assert_eq!(long.label, ChurnLabel::NoChurn);
    }

    #[tokio::test]
    async fn test_init_without_model_fails_with_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("feature_names.json");
        std::fs::write(&schema_path, r#"["tenure"]"#).unwrap();

        let mut config = AppConfig::default();
        config.artifacts.schema = crate::config::ArtifactSource::local(&schema_path);
        config.artifacts.model = crate::config::ArtifactSource::local(dir.path().join("m.onnx"));

        let result = InferenceEngine::init(&config).await;
        assert!(matches!(result, Err(ArtifactError::ModelUnavailable { .. })));
    }
}
