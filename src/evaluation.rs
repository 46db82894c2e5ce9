//! Offline model evaluation against a labelled snapshot.
//!
//! Scores every row of a CSV file with the same encoder and threshold the
//! service uses, computes classification metrics and persists them as a run
//! record under `<runs_dir>/<experiment>/<run_id>.json`.

use crate::models::InferenceEngine;
use crate::types::customer::CustomerRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Binary confusion matrix with churn as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl ConfusionMatrix {
    pub fn record(&mut self, actual: bool, predicted: bool) {
        match (actual, predicted) {
            (true, true) => self.true_positives += 1,
            (false, true) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (true, false) => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall; 0 when both are 0
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Metrics record persisted for one evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub run_id: Uuid,
    pub run_name: String,
    pub experiment: String,
    pub timestamp: DateTime<Utc>,
    pub data_path: PathBuf,
    pub model: String,
    pub model_path: Option<PathBuf>,
    pub threshold: f64,
    pub samples: u64,
    pub skipped: u64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub confusion_matrix: ConfusionMatrix,
}

/// Parse a ground-truth cell: `1/0`, `Yes/No`, `true/false` (any case).
pub fn parse_label(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "yes" | "true" | "churn" => Some(true),
        "0" | "0.0" | "no" | "false" | "no churn" => Some(false),
        _ => None,
    }
}

/// Scores a labelled CSV snapshot with an inference engine
pub struct Evaluator<'a> {
    engine: &'a InferenceEngine,
    label_column: String,
}

impl<'a> Evaluator<'a> {
    pub fn new(engine: &'a InferenceEngine, label_column: impl Into<String>) -> Self {
        Self {
            engine,
            label_column: label_column.into(),
        }
    }

    /// Score every row and accumulate the confusion matrix.
    ///
    /// Rows with an unparseable label or that fail to encode are skipped and
    /// counted; they do not abort the run.
    pub fn evaluate_csv<P: AsRef<Path>>(&self, path: P) -> Result<(ConfusionMatrix, u64)> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open evaluation data {}", path.display()))?;

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header of {}", path.display()))?
            .clone();
        let label_index = headers
            .iter()
            .position(|h| h == self.label_column)
            .with_context(|| {
                format!(
                    "Label column '{}' not found in {}",
                    self.label_column,
                    path.display()
                )
            })?;

        let mut matrix = ConfusionMatrix::default();
        let mut skipped = 0;

        for (line, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("Malformed CSV row {}", line + 1))?;

            let Some(actual) = row.get(label_index).and_then(parse_label) else {
                warn!(row = line + 1, "Unrecognized label, skipping row");
                skipped += 1;
                continue;
            };

            let mut record = CustomerRecord::new();
            for (i, (header, cell)) in headers.iter().zip(row.iter()).enumerate() {
                if i == label_index {
                    continue;
                }
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                record.insert(header, value);
            }

            match self.engine.predict(&record) {
                Ok(result) => matrix.record(actual, result.label.is_churn()),
                Err(e) => {
                    warn!(row = line + 1, error = %e, "Row failed to score, skipping");
                    skipped += 1;
                }
            }
        }

        Ok((matrix, skipped))
    }

    /// Evaluate a snapshot and build the run record
    pub fn run<P: AsRef<Path>>(
        &self,
        data_path: P,
        experiment: &str,
        run_name: &str,
    ) -> Result<EvaluationReport> {
        let data_path = data_path.as_ref();
        let (matrix, skipped) = self.evaluate_csv(data_path)?;
        if matrix.total() == 0 {
            anyhow::bail!(
                "no rows of {} could be scored ({} skipped)",
                data_path.display(),
                skipped
            );
        }

        let report = EvaluationReport {
            run_id: Uuid::new_v4(),
            run_name: run_name.to_string(),
            experiment: experiment.to_string(),
            timestamp: Utc::now(),
            data_path: data_path.to_path_buf(),
            model: self.engine.model_name().to_string(),
            model_path: self.engine.model_path().cloned(),
            threshold: self.engine.threshold(),
            samples: matrix.total(),
            skipped,
            accuracy: matrix.accuracy(),
            precision: matrix.precision(),
            recall: matrix.recall(),
            f1_score: matrix.f1(),
            confusion_matrix: matrix,
        };

        info!(
            run_id = %report.run_id,
            samples = report.samples,
            skipped = report.skipped,
            accuracy = format!("{:.3}", report.accuracy),
            f1 = format!("{:.3}", report.f1_score),
            "Evaluation complete"
        );
        Ok(report)
    }
}

/// Persist a run record; returns the file written
pub fn write_report<P: AsRef<Path>>(report: &EvaluationReport, runs_dir: P) -> Result<PathBuf> {
    let dir = runs_dir.as_ref().join(&report.experiment);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create run directory {}", dir.display()))?;

    let path = dir.join(format!("{}.json", report.run_id));
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write run record {}", path.display()))?;

    info!(run_id = %report.run_id, path = %path.display(), "Run record written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_encoder::{FeatureEncoder, FeatureSchema};
    use crate::models::TreeEnsemble;

    #[test]
    fn test_confusion_matrix_metrics() {
        let matrix = ConfusionMatrix {
            true_positives: 30,
            false_positives: 10,
            true_negatives: 50,
            false_negatives: 10,
        };

        assert_eq!(matrix.total(), 100);
        assert!((matrix.accuracy() - 0.8).abs() < 1e-12);
        assert!((matrix.precision() - 0.75).abs() < 1e-12);
        assert!((matrix.recall() - 0.75).abs() < 1e-12);
        assert!((matrix.f1() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_empty_matrix_is_zero() {
        let matrix = ConfusionMatrix::default();
        assert_eq!(matrix.accuracy(), 0.0);
        assert_eq!(matrix.f1(), 0.0);
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("Yes"), Some(true));
        assert_eq!(parse_label(" 0 "), Some(false));
        assert_eq!(parse_label("TRUE"), Some(true));
        assert_eq!(parse_label("maybe"), None);
    }

    fn engine() -> InferenceEngine {
        let schema = FeatureSchema::new(vec!["tenure".into(), "Contract_Two_year".into()]).unwrap();
        let dump = br#"[{ "nodeid": 0, "split": "tenure", "split_condition": 12.0,
            "yes": 1, "no": 2, "missing": 1,
            "children": [{ "nodeid": 1, "leaf": 2.0 }, { "nodeid": 2, "leaf": -2.0 }] }]"#;
        let model = TreeEnsemble::from_slice(dump, &schema, "stub.json".into()).unwrap();
        InferenceEngine::new(Box::new(model), schema, FeatureEncoder::new(), 0.5).unwrap()
    }

    #[test]
    fn test_evaluate_csv_and_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("test_clean.csv");
        std::fs::write(
            &data,
            "customerID,tenure,Contract,Churn\n\
             0001,3,Month-to-month,Yes\n\
             0002,40,Two year,No\n\
             0003,5,One year,No\n\
             0004,60,Month-to-month,Yes\n\
             0005,oops,Two year,No\n\
             0006,7,Two year,unknown\n",
        )
        .unwrap();

        let engine = engine();
        let evaluator = Evaluator::new(&engine, "Churn");
        let report = evaluator.run(&data, "telco", "unit").unwrap();

        assert_eq!(report.samples, 4);
        assert_eq!(report.skipped, 2);
        assert_eq!(
            report.confusion_matrix,
            ConfusionMatrix {
                true_positives: 1,
                false_positives: 1,
                true_negatives: 1,
                false_negatives: 1,
            }
        );
        assert!((report.accuracy - 0.5).abs() < 1e-12);

        let path = write_report(&report, dir.path().join("runs")).unwrap();
        assert!(path.starts_with(dir.path().join("runs").join("telco")));
        let stored: EvaluationReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.run_id, report.run_id);
        assert_eq!(stored.confusion_matrix, report.confusion_matrix);
    }

    #[test]
    fn test_boolean_dummy_columns_are_scored() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("test_clean.csv");
        std::fs::write(
            &data,
            "tenure,Contract_Two_year,Churn\n\
             2,False,1\n\
             30,True,0\n\
             50,False,0\n",
        )
        .unwrap();

        let engine = engine();
        let (matrix, skipped) = Evaluator::new(&engine, "Churn").evaluate_csv(&data).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(matrix.total(), 3);
        assert_eq!(matrix.true_positives, 1);
        assert_eq!(matrix.true_negatives, 2);
    }

    #[test]
    fn test_run_fails_when_nothing_scores() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("unusable.csv");
        std::fs::write(&data, "tenure,Churn\nabc,Yes\nxyz,No\n").unwrap();

        let engine = engine();
        let err = Evaluator::new(&engine, "Churn")
            .run(&data, "telco", "unit")
            .unwrap_err();
        assert!(err.to_string().contains("2 skipped"));
    }

    #[test]
    fn test_missing_label_column() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("no_label.csv");
        std::fs::write(&data, "tenure\n3\n").unwrap();

        let engine = engine();
        let err = Evaluator::new(&engine, "Churn")
            .evaluate_csv(&data)
            .unwrap_err();
        assert!(err.to_string().contains("Churn"));
    }
}
