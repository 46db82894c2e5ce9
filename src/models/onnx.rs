//! ONNX Runtime backend for exported gradient-boosted tree classifiers

use crate::feature_encoder::FeatureVector;
use crate::models::ChurnModel;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A classifier exported to ONNX (e.g. XGBoost via onnxmltools).
pub struct OnnxModel {
    name: String,
    /// Running a session needs exclusive access.
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    /// Load an ONNX model from file
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        ort::init().commit()?;
        info!(model = %name, path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(Self {
            name,
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    fn run(&self, features: &[f32]) -> Result<f64> {
        use ort::value::Tensor;

        // Shape [1, num_features]
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor = Tensor::from_array((shape, features.to_vec()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        extract_probability(&outputs, &self.output_name, &self.name)
    }
}

impl ChurnModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict_proba(&self, features: &FeatureVector) -> Result<f64> {
        self.run(features.values())
    }
}

/// Extract the churn-class probability from the session outputs.
///
/// Handles plain tensor outputs (`[batch, classes]`) and the `seq(map(int64,
/// float))` layout produced by the tree converters when zipmap is left on.
fn extract_probability(
    outputs: &ort::session::SessionOutputs,
    output_name: &str,
    model_name: &str,
) -> Result<f64> {
    if let Some(output) = outputs.get(output_name) {
        if let Some(prob) = probability_from_value(&output, model_name) {
            return Ok(prob);
        }
    }

    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Some(prob) = probability_from_value(&output, model_name) {
            debug!(model = %model_name, output = %name, "Extracted probability from fallback output");
            return Ok(prob);
        }
    }

    warn!(model = %model_name, "Model produced no recognizable probability output");
    anyhow::bail!("no probability output found in model {}", model_name)
}

fn probability_from_value(output: &ort::value::DynValue, model_name: &str) -> Option<f64> {
    let dtype = output.dtype();

    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        let prob = positive_class_from_tensor(&dims, data)?;
        debug!(model = %model_name, prob = prob, "Extracted from tensor");
        return Some(prob);
    }

    if DynSequenceValueType::can_downcast(&dtype) {
        match positive_class_from_sequence_map(output) {
            Ok(prob) => {
                debug!(model = %model_name, prob = prob, "Extracted from seq(map)");
                return Some(prob);
            }
            Err(e) => {
                debug!(model = %model_name, error = %e, "seq(map) extraction failed");
            }
        }
    }

    None
}

fn positive_class_from_sequence_map(output: &ort::value::DynValue) -> Result<f64> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;
    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
    let first = maps
        .first()
        .ok_or_else(|| anyhow::anyhow!("Empty sequence"))?;
    let kv_pairs = first.try_extract_key_values::<i64, f32>()?;

    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 1) {
        return Ok(*prob as f64);
    }
    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 0) {
        return Ok(1.0 - *prob as f64);
    }
    anyhow::bail!("No probability found in map")
}

/// Positive-class probability from a probability tensor with batch size 1.
fn positive_class_from_tensor(dims: &[i64], data: &[f32]) -> Option<f64> {
    let classes = match dims {
        [_, classes] | [classes] => *classes,
        _ => return None,
    };
    match classes {
        c if c >= 2 => data.get(1).map(|&v| v as f64),
        1 => data.first().map(|&v| v as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_class_tensor_uses_index_one() {
        assert_eq!(positive_class_from_tensor(&[1, 2], &[0.3, 0.7]), Some(0.7f32 as f64));
        assert_eq!(positive_class_from_tensor(&[2], &[0.25, 0.75]), Some(0.75));
    }

    #[test]
    fn test_single_column_tensor() {
        assert_eq!(positive_class_from_tensor(&[1, 1], &[0.5]), Some(0.5));
    }

    #[test]
    fn test_unexpected_shapes() {
        assert_eq!(positive_class_from_tensor(&[1, 2, 3], &[0.1; 6]), None);
        assert_eq!(positive_class_from_tensor(&[1, 0], &[]), None);
    }
}
