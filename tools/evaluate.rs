//! Model Evaluation Job
//!
//! Scores a labelled snapshot with the configured model and persists a run
//! record. Usage: `churn-evaluate [DATA_CSV] [RUN_NAME]`; both default to
//! the `[evaluation]` configuration section.

use anyhow::{Context, Result};
use churn_prediction_service::{
    config::AppConfig,
    evaluation::{self, Evaluator},
    logging,
    models::inference::InferenceEngine,
};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging)?;

    let args: Vec<String> = std::env::args().collect();
    let data_path = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.evaluation.data_path.clone());
    let run_name = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| config.evaluation.run_name.clone());

    info!(data = %data_path.display(), run_name = %run_name, "Starting evaluation");

    let engine = InferenceEngine::init(&config)
        .await
        .context("Failed to load model artifacts")?;

    let evaluator = Evaluator::new(&engine, config.evaluation.label_column.as_str());
    let report = evaluator.run(&data_path, &config.evaluation.experiment, &run_name)?;
    let path = evaluation::write_report(&report, &config.evaluation.runs_dir)?;

    println!("run_id:    {}", report.run_id);
    println!("samples:   {} ({} skipped)", report.samples, report.skipped);
    println!("accuracy:  {:.4}", report.accuracy);
    println!("precision: {:.4}", report.precision);
    println!("recall:    {:.4}", report.recall);
    println!("f1_score:  {:.4}", report.f1_score);
    println!("record:    {}", path.display());

    Ok(())
}
