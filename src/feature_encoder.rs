//! Feature encoding for churn model inference.
//!
//! Maps a raw customer record onto the exact column vector the trained model
//! expects. The column set and order come from the feature schema persisted at
//! training time, so the same encoder serves any model trained on the Telco
//! field set regardless of which dummy columns it kept.

use crate::error::{ArtifactError, DecodeError, EncodingError};
use crate::types::customer::CustomerRecord;
use crate::types::prediction::{ChurnLabel, PredictionResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Decision threshold used when no tuned value was persisted
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// How a raw field is turned into columns.
#[derive(Debug, Clone, Copy)]
enum FieldKind {
    /// Two literals; `positive` encodes to 1, everything else to 0.
    Binary {
        positive: &'static str,
        negative: &'static str,
    },
    /// One indicator column per literal.
    OneHot(&'static [&'static str]),
    /// Passed through as a float.
    Numeric { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
}

const YES_NO: FieldKind = FieldKind::Binary {
    positive: "Yes",
    negative: "No",
};

const INTERNET_ADDON: &[&str] = &["Yes", "No", "No internet service"];

/// Raw Telco customer fields in training column order.
const CUSTOMER_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "gender",
        kind: FieldKind::Binary {
            positive: "Male",
            negative: "Female",
        },
    },
    FieldSpec {
        name: "SeniorCitizen",
        kind: FieldKind::Numeric { min: 0.0, max: 1.0 },
    },
    FieldSpec { name: "Partner", kind: YES_NO },
    FieldSpec { name: "Dependents", kind: YES_NO },
    FieldSpec {
        name: "tenure",
        kind: FieldKind::Numeric {
            min: 0.0,
            max: f64::INFINITY,
        },
    },
    FieldSpec { name: "PhoneService", kind: YES_NO },
    FieldSpec {
        name: "MultipleLines",
        kind: FieldKind::OneHot(&["Yes", "No", "No phone service"]),
    },
    FieldSpec {
        name: "InternetService",
        kind: FieldKind::OneHot(&["DSL", "Fiber optic", "No"]),
    },
    FieldSpec {
        name: "OnlineSecurity",
        kind: FieldKind::OneHot(INTERNET_ADDON),
    },
    FieldSpec {
        name: "OnlineBackup",
        kind: FieldKind::OneHot(INTERNET_ADDON),
    },
    FieldSpec {
        name: "DeviceProtection",
        kind: FieldKind::OneHot(INTERNET_ADDON),
    },
    FieldSpec {
        name: "TechSupport",
        kind: FieldKind::OneHot(INTERNET_ADDON),
    },
    FieldSpec {
        name: "StreamingTV",
        kind: FieldKind::OneHot(INTERNET_ADDON),
    },
    FieldSpec {
        name: "StreamingMovies",
        kind: FieldKind::OneHot(INTERNET_ADDON),
    },
    FieldSpec {
        name: "Contract",
        kind: FieldKind::OneHot(&["Month-to-month", "One year", "Two year"]),
    },
    FieldSpec { name: "PaperlessBilling", kind: YES_NO },
    FieldSpec {
        name: "PaymentMethod",
        kind: FieldKind::OneHot(&[
            "Electronic check",
            "Mailed check",
            "Bank transfer (automatic)",
            "Credit card (automatic)",
        ]),
    },
    FieldSpec {
        name: "MonthlyCharges",
        kind: FieldKind::Numeric {
            min: 0.0,
            max: f64::INFINITY,
        },
    },
    FieldSpec {
        name: "TotalCharges",
        kind: FieldKind::Numeric {
            min: 0.0,
            max: f64::INFINITY,
        },
    },
];

/// Indicator column name for a categorical literal: `Contract` + `Two year`
/// gives `Contract_Two_year`.
pub fn indicator_column(field: &str, literal: &str) -> String {
    format!("{}_{}", field, literal.replace(' ', "_"))
}

/// Ordered, immutable list of the columns a trained model expects.
///
/// Cheap to clone; all clones share the same storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Arc<[String]>,
    index: Arc<HashMap<String, usize>>,
}

impl FeatureSchema {
    /// Build a schema, rejecting empty lists and duplicate column names.
    pub fn new(names: Vec<String>) -> Result<Self, ArtifactError> {
        if names.is_empty() {
            return Err(ArtifactError::InvalidSchema(
                "schema contains no feature names".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            if index.insert(name.clone(), position).is_some() {
                return Err(ArtifactError::InvalidSchema(format!(
                    "duplicate feature name '{}'",
                    name
                )));
            }
        }

        Ok(Self {
            names: names.into(),
            index: Arc::new(index),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of a column in model input order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
}

/// Numeric model input aligned to a [`FeatureSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: FeatureSchema,
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn names(&self) -> &[String] {
        self.schema.names()
    }

    /// Values in schema order, ready to be fed to the model
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.schema.position(name).map(|i| self.values[i])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(column, value)` pairs in schema order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Intermediate encoded cell, before schema alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell {
    Number(f64),
    NonNumeric,
}

/// Encoder from raw customer records to model input, and from model output
/// to labelled predictions.
///
/// Stateless apart from the strictness flag; safe to share across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEncoder {
    strict: bool,
}

impl FeatureEncoder {
    /// Encoder with the silent-default policy: unrecognized categorical
    /// values encode to all-zero indicators.
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Encoder that rejects unrecognized categorical values and out-of-range
    /// numeric fields. Absent fields still default.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn with_strict(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Every column name the encoder can produce from the raw Telco fields,
    /// in training order. Useful as a default schema.
    pub fn encoded_columns() -> Vec<String> {
        let mut columns = Vec::new();
        for spec in CUSTOMER_FIELDS {
            match spec.kind {
                FieldKind::Binary { .. } | FieldKind::Numeric { .. } => {
                    columns.push(spec.name.to_string())
                }
                FieldKind::OneHot(literals) => {
                    columns.extend(literals.iter().map(|l| indicator_column(spec.name, l)))
                }
            }
        }
        columns
    }

    /// Encode a record into a vector whose columns are exactly `schema`.
    ///
    /// Schema columns the record cannot produce are 0.0; encoded columns
    /// outside the schema are dropped. Fails if any schema column would hold
    /// a non-numeric value.
    pub fn encode(
        &self,
        record: &CustomerRecord,
        schema: &FeatureSchema,
    ) -> Result<FeatureVector, EncodingError> {
        if self.strict {
            self.validate(record)?;
        }

        let cells = encode_cells(record);

        let mut values = Vec::with_capacity(schema.len());
        let mut non_numeric = Vec::new();
        for name in schema.names() {
            match cells.get(name.as_str()) {
                Some(Cell::Number(v)) => values.push(*v as f32),
                Some(Cell::NonNumeric) => {
                    non_numeric.push(name.clone());
                    values.push(0.0);
                }
                None => values.push(0.0),
            }
        }

        if !non_numeric.is_empty() {
            return Err(EncodingError::NonNumeric {
                columns: non_numeric,
            });
        }

        Ok(FeatureVector {
            schema: schema.clone(),
            values,
        })
    }

    /// Map a raw positive-class probability to a labelled prediction.
    ///
    /// The label compares the unrounded probability; the returned probability
    /// is rounded to 3 decimal places.
    pub fn decode(probability: f64, threshold: f64) -> Result<PredictionResult, DecodeError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DecodeError::InvalidProbability(probability));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DecodeError::InvalidThreshold(threshold));
        }

        Ok(PredictionResult {
            probability: (probability * 1000.0).round() / 1000.0,
            label: ChurnLabel::from_probability(probability, threshold),
            threshold,
        })
    }

    fn validate(&self, record: &CustomerRecord) -> Result<(), EncodingError> {
        let mut unrecognized = Vec::new();
        let mut errors = Vec::new();

        for spec in CUSTOMER_FIELDS {
            let Some(value) = record.get(spec.name) else {
                continue;
            };

            match spec.kind {
                FieldKind::Binary { positive, negative } => {
                    if !matches!(value.as_str(), Some(v) if v == positive || v == negative) {
                        unrecognized.push((spec.name.to_string(), display_value(value)));
                    }
                }
                FieldKind::OneHot(literals) => {
                    if !matches!(value.as_str(), Some(v) if literals.contains(&v)) {
                        unrecognized.push((spec.name.to_string(), display_value(value)));
                    }
                }
                FieldKind::Numeric { min, max } => {
                    // Non-numeric values surface later with the column name.
                    if let Cell::Number(v) = numeric_cell(value) {
                        if v < min || v > max {
                            errors.push(EncodingError::OutOfRange {
                                field: spec.name.to_string(),
                                value: v,
                            });
                        }
                    }
                }
            }
        }

        if !unrecognized.is_empty() {
            errors.insert(
                0,
                EncodingError::UnrecognizedCategory {
                    fields: unrecognized,
                },
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(EncodingError::Multiple(errors)),
        }
    }
}

/// Encode the raw fields present in the record, plus pass-through columns.
///
/// Absent raw fields produce no cells; schema alignment fills them with 0.0.
fn encode_cells(record: &CustomerRecord) -> HashMap<String, Cell> {
    let mut cells = HashMap::new();

    for spec in CUSTOMER_FIELDS {
        let Some(value) = record.get(spec.name) else {
            continue;
        };

        match spec.kind {
            FieldKind::Binary { positive, .. } => {
                let bit = value.as_str() == Some(positive);
                cells.insert(spec.name.to_string(), Cell::Number(f64::from(u8::from(bit))));
            }
            FieldKind::OneHot(literals) => {
                let raw = value.as_str();
                for literal in literals {
                    let hit = raw == Some(*literal);
                    cells.insert(
                        indicator_column(spec.name, literal),
                        Cell::Number(f64::from(u8::from(hit))),
                    );
                }
            }
            FieldKind::Numeric { .. } => {
                cells.insert(spec.name.to_string(), numeric_cell(value));
            }
        }
    }

    // Keys that are not raw fields (e.g. an already one-hot encoded
    // `Contract_Two_year`) pass through; encoded columns take precedence.
    for (key, value) in record.fields() {
        if value.is_null() || cells.contains_key(key) || is_raw_field(key) {
            continue;
        }
        cells.insert(key.clone(), numeric_cell(value));
    }

    cells
}

fn is_raw_field(name: &str) -> bool {
    CUSTOMER_FIELDS.iter().any(|spec| spec.name == name)
}

/// Interpret a JSON value as a finite float.
fn numeric_cell(value: &Value) -> Cell {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => parse_numeric_str(s.trim()),
        Value::Null => Some(0.0),
        Value::Array(_) | Value::Object(_) => None,
    };

    // Model input is f32; values that overflow it are as unusable as inf.
    match number {
        Some(v) if v.is_finite() && (v as f32).is_finite() => Cell::Number(v),
        _ => Cell::NonNumeric,
    }
}

/// Float text, or a boolean spelled the way CSV exports write dummy columns.
fn parse_numeric_str(s: &str) -> Option<f64> {
    if s.eq_ignore_ascii_case("true") {
        Some(1.0)
    } else if s.eq_ignore_ascii_case("false") {
        Some(0.0)
    } else {
        s.parse::<f64>().ok()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        let names = FeatureEncoder::encoded_columns();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names: names.into(),
            index: Arc::new(index),
        }
    }
}
