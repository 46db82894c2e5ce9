//! Artifact resolution and loading.
//!
//! Every persisted artifact (model, feature schema, tuned threshold) is looked
//! up at its primary path, then its fallback path, then downloaded from its
//! object-store URL into the local cache directory.

use crate::config::ArtifactSource;
use crate::error::ArtifactError;
use crate::feature_encoder::FeatureSchema;
use crate::models::{ChurnModel, OnnxModel, TreeEnsemble};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Which artifact is being resolved; selects the "unavailable" error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Schema,
    Threshold,
}

impl ArtifactKind {
    fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Model => "model",
            ArtifactKind::Schema => "schema",
            ArtifactKind::Threshold => "threshold",
        }
    }

    fn unavailable(self, tried: Vec<String>) -> ArtifactError {
        match self {
            ArtifactKind::Schema => ArtifactError::SchemaUnavailable { tried },
            ArtifactKind::Model => ArtifactError::ModelUnavailable { tried },
            ArtifactKind::Threshold => ArtifactError::ThresholdUnavailable { tried },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Names(Vec<String>),
    FeatureInfo { feature_names: Vec<String> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdFile {
    Bare(f64),
    Tagged { threshold: f64 },
}

/// Resolves artifact locations and parses the files behind them
pub struct ArtifactLoader {
    http: reqwest::Client,
    cache_dir: PathBuf,
}

impl ArtifactLoader {
    /// Create a loader that caches remote downloads under `cache_dir`
    pub fn new<P: Into<PathBuf>>(cache_dir: P, download_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(download_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client for artifact downloads");
                reqwest::Client::new()
            });

        Self {
            http,
            cache_dir: cache_dir.into(),
        }
    }

    /// Find a readable local copy of an artifact, downloading it if needed.
    pub async fn resolve(
        &self,
        kind: ArtifactKind,
        source: &ArtifactSource,
    ) -> Result<PathBuf, ArtifactError> {
        match self.try_resolve(kind, source).await {
            Ok(path) => Ok(path),
            Err(tried) => Err(kind.unavailable(tried)),
        }
    }

    /// Like [`resolve`](Self::resolve) but an artifact that exists nowhere is
    /// not an error.
    pub async fn resolve_optional(
        &self,
        kind: ArtifactKind,
        source: &ArtifactSource,
    ) -> Option<PathBuf> {
        self.try_resolve(kind, source).await.ok()
    }

    async fn try_resolve(
        &self,
        kind: ArtifactKind,
        source: &ArtifactSource,
    ) -> Result<PathBuf, Vec<String>> {
        let mut tried = Vec::new();

        let locals = std::iter::once(&source.path).chain(source.fallback_path.as_ref());
        for path in locals {
            if path.is_file() {
                info!(artifact = kind.as_str(), path = %path.display(), "Artifact resolved");
                return Ok(path.clone());
            }
            warn!(artifact = kind.as_str(), path = %path.display(), "Artifact not found");
            tried.push(path.display().to_string());
        }

        if let Some(url) = &source.remote_url {
            tried.push(url.clone());
            let target = self.cache_dir.join(cache_file_name(url, &source.path));
            match self.download(url, &target).await {
                Ok(()) => {
                    info!(
                        artifact = kind.as_str(),
                        url = %url,
                        path = %target.display(),
                        "Artifact downloaded"
                    );
                    return Ok(target);
                }
                Err(e) => {
                    warn!(artifact = kind.as_str(), url = %url, error = %e, "Artifact download failed");
                }
            }
        }

        Err(tried)
    }

    async fn download(&self, url: &str, target: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed downloading artifact from {}", url))?
            .error_for_status()
            .with_context(|| format!("artifact download rejected by {}", url))?
            .bytes()
            .await
            .with_context(|| format!("failed reading artifact body from {}", url))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed creating cache dir {}", parent.display()))?;
        }
        tokio::fs::write(target, &bytes)
            .await
            .with_context(|| format!("failed writing {}", target.display()))?;
        Ok(())
    }
}

/// Local file name for a downloaded artifact: the URL's last path segment,
/// or the primary path's file name when the URL has none.
fn cache_file_name(url: &str, primary: &Path) -> String {
    let segment = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty() && !s.contains(':'));

    match segment {
        Some(name) => name.to_string(),
        None => primary
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let raw = std::fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a feature schema: a JSON array of names, or an object with a
/// `feature_names` array.
pub fn load_schema<P: AsRef<Path>>(path: P) -> Result<FeatureSchema, ArtifactError> {
    let path = path.as_ref();
    let names = match read_json::<SchemaFile>(path)? {
        SchemaFile::Names(names) => names,
        SchemaFile::FeatureInfo { feature_names } => feature_names,
    };
    let schema = FeatureSchema::new(names)?;
    info!(path = %path.display(), features = schema.len(), "Feature schema loaded");
    Ok(schema)
}

/// Parse a tuned threshold: a bare number or `{"threshold": x}`.
pub fn load_threshold<P: AsRef<Path>>(path: P) -> Result<f64, ArtifactError> {
    let path = path.as_ref();
    let threshold = match read_json::<ThresholdFile>(path)? {
        ThresholdFile::Bare(t) => t,
        ThresholdFile::Tagged { threshold } => threshold,
    };
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ArtifactError::InvalidThreshold {
            path: path.to_path_buf(),
            reason: format!("{} is outside [0, 1]", threshold),
        });
    }
    info!(path = %path.display(), threshold = threshold, "Tuned decision threshold loaded");
    Ok(threshold)
}

/// Load a model, picking the backend from the file extension.
pub fn load_model<P: AsRef<Path>>(
    path: P,
    schema: &FeatureSchema,
    onnx_threads: usize,
) -> Result<Box<dyn ChurnModel>, ArtifactError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("onnx") => {
            let model = OnnxModel::load(path, onnx_threads).map_err(|e| {
                ArtifactError::InvalidModel {
                    path: path.to_path_buf(),
                    reason: format!("{:#}", e),
                }
            })?;
            Ok(Box::new(model))
        }
        Some("json") => Ok(Box::new(TreeEnsemble::load(path, schema)?)),
        _ => Err(ArtifactError::InvalidModel {
            path: path.to_path_buf(),
            reason: "unsupported model format (expected .onnx or .json)".to_string(),
        }),
    }
}
