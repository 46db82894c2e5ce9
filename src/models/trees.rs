//! Native evaluator for XGBoost JSON tree dumps.
//!
//! Accepts the output of `Booster.dump_model(path, dump_format="json")`, a
//! bare array of trees, or an object `{"base_score": f, "trees": [...]}`.
//! Split feature names are resolved against the feature schema once at load
//! time so scoring is a plain walk over flat node arrays.

use crate::error::ArtifactError;
use crate::feature_encoder::{FeatureSchema, FeatureVector};
use crate::models::ChurnModel;
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DumpNode {
    Leaf {
        nodeid: u32,
        leaf: f64,
    },
    Split {
        nodeid: u32,
        split: String,
        split_condition: f64,
        yes: u32,
        no: u32,
        missing: u32,
        children: Vec<DumpNode>,
    },
}

impl DumpNode {
    fn nodeid(&self) -> u32 {
        match self {
            DumpNode::Leaf { nodeid, .. } | DumpNode::Split { nodeid, .. } => *nodeid,
        }
    }
}

fn default_base_score() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DumpFile {
    Bare(Vec<DumpNode>),
    WithBase {
        #[serde(default = "default_base_score")]
        base_score: f64,
        trees: Vec<DumpNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f32,
        yes: usize,
        no: usize,
        missing: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    /// Root at index 0
    nodes: Vec<Node>,
}

impl Tree {
    fn from_dump(root: &DumpNode, schema: &FeatureSchema) -> Result<Self, String> {
        // Flatten depth-first, remembering where each nodeid landed.
        let mut flat: Vec<&DumpNode> = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            flat.push(node);
            if let DumpNode::Split { children, .. } = node {
                stack.extend(children.iter().rev());
            }
        }

        let mut slot = HashMap::with_capacity(flat.len());
        for (i, node) in flat.iter().enumerate() {
            if slot.insert(node.nodeid(), i).is_some() {
                return Err(format!("duplicate nodeid {}", node.nodeid()));
            }
        }
        let lookup = |id: u32| {
            slot.get(&id)
                .copied()
                .ok_or_else(|| format!("reference to missing nodeid {}", id))
        };

        let mut nodes = Vec::with_capacity(flat.len());
        for node in &flat {
            nodes.push(match node {
                DumpNode::Leaf { leaf, .. } => Node::Leaf(*leaf),
                DumpNode::Split {
                    split,
                    split_condition,
                    yes,
                    no,
                    missing,
                    ..
                } => Node::Split {
                    feature: resolve_feature(split, schema)?,
                    threshold: *split_condition as f32,
                    yes: lookup(*yes)?,
                    no: lookup(*no)?,
                    missing: lookup(*missing)?,
                },
            });
        }

        Ok(Self { nodes })
    }

    fn leaf_value(&self, features: &[f32]) -> Result<f64> {
        let mut at = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            match &self.nodes[at] {
                Node::Leaf(value) => return Ok(*value),
                Node::Split {
                    feature,
                    threshold,
                    yes,
                    no,
                    missing,
                } => {
                    let x = features[*feature];
                    at = if x.is_nan() {
                        *missing
                    } else if x < *threshold {
                        *yes
                    } else {
                        *no
                    };
                }
            }
        }
        bail!("tree walk did not reach a leaf (cyclic node references)")
    }
}

/// Map a split name to a schema position: either the column name itself or
/// XGBoost's positional `f<index>` form.
fn resolve_feature(split: &str, schema: &FeatureSchema) -> Result<usize, String> {
    if let Some(position) = schema.position(split) {
        return Ok(position);
    }
    if let Some(index) = split.strip_prefix('f').and_then(|i| i.parse::<usize>().ok()) {
        if index < schema.len() {
            return Ok(index);
        }
    }
    Err(format!("split feature '{}' is not in the feature schema", split))
}

/// Gradient-boosted tree ensemble with a logistic link.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    name: String,
    base_margin: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    /// Load and validate a JSON dump against the feature schema.
    pub fn load<P: AsRef<Path>>(path: P, schema: &FeatureSchema) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trees".to_string());

        let ensemble = Self::from_slice(&raw, schema, name).map_err(|reason| {
            ArtifactError::InvalidModel {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        info!(
            model = %ensemble.name,
            trees = ensemble.trees.len(),
            features = ensemble.n_features,
            "Tree ensemble loaded"
        );
        Ok(ensemble)
    }

    /// Parse a dump held in memory.
    pub fn from_slice(raw: &[u8], schema: &FeatureSchema, name: String) -> Result<Self, String> {
        let dump: DumpFile = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
        let (base_score, roots) = match dump {
            DumpFile::Bare(trees) => (default_base_score(), trees),
            DumpFile::WithBase { base_score, trees } => (base_score, trees),
        };

        if !(base_score > 0.0 && base_score < 1.0) {
            return Err(format!("base_score {} is outside (0, 1)", base_score));
        }
        if roots.is_empty() {
            return Err("dump contains no trees".to_string());
        }

        let trees = roots
            .iter()
            .enumerate()
            .map(|(i, root)| Tree::from_dump(root, schema).map_err(|e| format!("tree {}: {}", i, e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            base_margin: (base_score / (1.0 - base_score)).ln(),
            n_features: schema.len(),
            trees,
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Raw additive score before the logistic link
    pub fn margin(&self, features: &[f32]) -> Result<f64> {
        if features.len() != self.n_features {
            bail!(
                "expected {} features, got {}",
                self.n_features,
                features.len()
            );
        }
        let mut margin = self.base_margin;
        for tree in &self.trees {
            margin += tree.leaf_value(features)?;
        }
        Ok(margin)
    }
}

impl ChurnModel for TreeEnsemble {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict_proba(&self, features: &FeatureVector) -> Result<f64> {
        let margin = self.margin(features.values())?;
        Ok(1.0 / (1.0 + (-margin).exp()))
    }
}
