//! Churn model backends, artifact loading and the inference engine

pub mod inference;
pub mod loader;
pub mod onnx;
pub mod trees;

use crate::feature_encoder::FeatureVector;
use anyhow::Result;

pub use inference::InferenceEngine;
pub use loader::ArtifactLoader;
pub use onnx::OnnxModel;
pub use trees::TreeEnsemble;

/// A trained binary classifier that scores schema-aligned feature vectors.
pub trait ChurnModel: Send + Sync {
    /// Backend and artifact name, for logs and health output
    fn name(&self) -> &str;

    /// Probability of the positive (churn) class
    fn predict_proba(&self, features: &FeatureVector) -> Result<f64>;
}
