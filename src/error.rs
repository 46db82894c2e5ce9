//! Typed errors for encoding, decoding, artifact resolution and prediction.

use std::path::PathBuf;
use thiserror::Error;

/// A raw record could not be turned into a model-ready feature vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    /// One or more schema columns ended up holding a value that is not a number.
    #[error("non-numeric value in feature column(s): {}", columns.join(", "))]
    NonNumeric { columns: Vec<String> },

    /// Strict mode only: a categorical field holds a value outside its enumeration.
    #[error("unrecognized categorical value(s): {}", format_pairs(fields))]
    UnrecognizedCategory { fields: Vec<(String, String)> },

    /// Strict mode only: a numeric field is outside its allowed range.
    #[error("value out of range for {field}: {value}")]
    OutOfRange { field: String, value: f64 },

    /// Strict mode only: more than one validation failure in the same record.
    #[error("{}", format_errors(.0))]
    Multiple(Vec<EncodingError>),

    /// The payload was not a JSON object.
    #[error("customer record must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl EncodingError {
    /// Columns or fields the error points at, for client diagnostics.
    pub fn columns(&self) -> Vec<String> {
        match self {
            EncodingError::NonNumeric { columns } => columns.clone(),
            EncodingError::UnrecognizedCategory { fields } => {
                fields.iter().map(|(field, _)| field.clone()).collect()
            }
            EncodingError::OutOfRange { field, .. } => vec![field.clone()],
            EncodingError::Multiple(errors) => errors.iter().flat_map(|e| e.columns()).collect(),
            EncodingError::NotAnObject(_) => Vec::new(),
        }
    }
}

fn format_errors(errors: &[EncodingError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(field, value)| format!("{field}={value:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A raw model output could not be mapped to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DecodeError {
    #[error("probability {0} is outside [0, 1]")]
    InvalidProbability(f64),

    #[error("decision threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
}

/// Startup-time failures while resolving or parsing persisted artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("model artifact unavailable, tried: {}", display_tried(tried))]
    ModelUnavailable { tried: Vec<String> },

    #[error("feature schema unavailable, tried: {}", display_tried(tried))]
    SchemaUnavailable { tried: Vec<String> },

    #[error("decision threshold artifact unavailable, tried: {}", display_tried(tried))]
    ThresholdUnavailable { tried: Vec<String> },

    #[error("invalid feature schema: {0}")]
    InvalidSchema(String),

    #[error("invalid decision threshold in {path}: {reason}")]
    InvalidThreshold { path: PathBuf, reason: String },

    #[error("invalid model artifact {path}: {reason}")]
    InvalidModel { path: PathBuf, reason: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn display_tried(tried: &[String]) -> String {
    if tried.is_empty() {
        "no locations configured".to_string()
    } else {
        tried.join(", ")
    }
}

/// Anything that can go wrong between a raw record and a labelled prediction.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Backend failure while scoring an encoded vector.
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

impl PredictError {
    /// Short machine-readable kind used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Encoding(_) => "encoding",
            PredictError::Decode(_) => "decode",
            PredictError::Model(_) => "model",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_numeric_message_names_columns() {
        let err = EncodingError::NonNumeric {
            columns: vec!["TotalCharges".to_string(), "Contract_Two_year".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("TotalCharges"));
        assert!(msg.contains("Contract_Two_year"));
        assert_eq!(err.columns().len(), 2);
    }

    #[test]
    fn test_unavailable_lists_every_location() {
        let err = ArtifactError::ModelUnavailable {
            tried: vec!["models/a.onnx".to_string(), "https://bucket/a.onnx".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("models/a.onnx"));
        assert!(msg.contains("https://bucket/a.onnx"));
    }

    #[test]
    fn test_multiple_collects_every_column() {
        let err = EncodingError::Multiple(vec![
            EncodingError::UnrecognizedCategory {
                fields: vec![("Contract".to_string(), "Three year".to_string())],
            },
            EncodingError::OutOfRange {
                field: "tenure".to_string(),
                value: -1.0,
            },
        ]);
        assert_eq!(err.columns(), vec!["Contract".to_string(), "tenure".to_string()]);
        let msg = err.to_string();
        assert!(msg.contains("Three year"));
        assert!(msg.contains("tenure"));
    }
}
