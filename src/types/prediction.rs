//! Prediction output data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Human-facing churn label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChurnLabel {
    #[serde(rename = "Churn")]
    Churn,
    #[serde(rename = "No Churn")]
    NoChurn,
}

impl ChurnLabel {
    /// Label for a probability at a given threshold (boundary inclusive)
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability >= threshold {
            ChurnLabel::Churn
        } else {
            ChurnLabel::NoChurn
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChurnLabel::Churn => "Churn",
            ChurnLabel::NoChurn => "No Churn",
        }
    }

    /// Positive class indicator, as used by the evaluation job
    pub fn is_churn(&self) -> bool {
        matches!(self, ChurnLabel::Churn)
    }
}

impl fmt::Display for ChurnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded model output returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Churn probability rounded to 3 decimal places
    #[serde(rename = "churn_probability")]
    pub probability: f64,

    /// Label derived from the unrounded probability
    #[serde(rename = "churn_label")]
    pub label: ChurnLabel,

    /// Decision threshold the label was derived with
    pub threshold: f64,
}
