//! Churn Prediction Service Library
//!
//! Encodes raw Telco customer records into the model's feature layout, scores
//! them with a gradient-boosted classifier and labels the result against a
//! decision threshold. Served over HTTP with health and Prometheus metrics.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod feature_encoder;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use error::{ArtifactError, DecodeError, EncodingError, PredictError};
pub use feature_encoder::{FeatureEncoder, FeatureSchema, FeatureVector};
pub use models::inference::InferenceEngine;
pub use types::{ChurnLabel, CustomerRecord, PredictionResult};
