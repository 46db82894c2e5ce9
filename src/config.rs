//! Configuration management for the churn prediction service

use crate::feature_encoder::DEFAULT_THRESHOLD;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable that overrides the configuration file location
pub const CONFIG_PATH_ENV: &str = "CHURN_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub artifacts: ArtifactsConfig,
    pub decision: DecisionConfig,
    pub encoding: EncodingConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub evaluation: EvaluationConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Where one persisted artifact can be found, in resolution order:
/// `path`, then `fallback_path`, then `remote_url`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactSource {
    pub path: PathBuf,
    #[serde(default)]
    pub fallback_path: Option<PathBuf>,
    /// Object-store URL fetched over HTTP when no local copy exists
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl ArtifactSource {
    pub fn local<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            fallback_path: None,
            remote_url: None,
        }
    }
}

/// Trained model artifacts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Model file; `.onnx` runs on ONNX Runtime, `.json` is an XGBoost tree dump
    pub model: ArtifactSource,
    /// Ordered feature-name list persisted at training time
    pub schema: ArtifactSource,
    /// Optional tuned decision threshold
    pub threshold: Option<ArtifactSource>,
    /// Directory remote downloads are written to
    pub cache_dir: PathBuf,
    /// Intra-op threads per ONNX session
    pub onnx_threads: usize,
    /// Timeout for remote artifact downloads
    pub download_timeout_secs: u64,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            model: ArtifactSource {
                path: PathBuf::from("models/churn_model.onnx"),
                fallback_path: Some(PathBuf::from("models/churn_model.json")),
                remote_url: None,
            },
            schema: ArtifactSource::local("models/feature_names.json"),
            threshold: Some(ArtifactSource::local("models/optimal_threshold.json")),
            cache_dir: PathBuf::from("models/cache"),
            onnx_threads: 1,
            download_timeout_secs: 30,
        }
    }
}

/// Decision configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Threshold used when no tuned threshold artifact resolves
    pub threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Feature encoding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Reject unrecognized categorical values instead of zero-filling them
    pub strict: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between summary log lines; 0 disables the reporter
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
        }
    }
}

/// Offline evaluation job configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Labelled snapshot to score
    pub data_path: PathBuf,
    /// Name of the ground-truth column
    pub label_column: String,
    /// Root directory for run records
    pub runs_dir: PathBuf,
    pub experiment: String,
    pub run_name: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/test_clean.csv"),
            label_column: "Churn".to_string(),
            runs_dir: PathBuf::from("monitoring/runs"),
            experiment: "telco-churn-monitoring".to_string(),
            run_name: "model-evaluation".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `$CHURN_CONFIG` or the default file, layered
    /// with `CHURN__SECTION__KEY` environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path. A missing file falls back to
    /// built-in defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("CHURN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.decision.threshold) {
            anyhow::bail!(
                "decision.threshold must be within [0, 1], got {}",
                self.decision.threshold
            );
        }
        if self.artifacts.onnx_threads == 0 {
            anyhow::bail!("artifacts.onnx_threads must be at least 1");
        }
        Ok(())
    }
}
