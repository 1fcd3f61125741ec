//! Frozen policy artifact.
//!
//! The trained actor network is exported to a JSON file of dense layers
//! (row-major weights plus bias). Inference is a deterministic forward
//! pass: tanh on hidden layers, softmax on the nine-way head. A missing
//! artifact falls back to uniform allocations; a corrupt one is fatal at
//! startup.

use crate::features::{FeatureVector, FEATURE_DIM};
use indra_core::NUM_META_GROUPS;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy artifact unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Policy artifact corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Deserialize)]
struct LayerDto {
    /// Row-major weights: rows = outputs, cols = inputs.
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ArtifactDto {
    #[serde(default)]
    version: Option<String>,
    layers: Vec<LayerDto>,
}

struct Layer {
    weights: DMatrix<f64>,
    bias: DVector<f64>,
}

/// A loaded policy: the trained network, or the uniform fallback when no
/// artifact is present.
pub struct Policy {
    version: String,
    /// Empty for the uniform fallback.
    layers: Vec<Layer>,
}

impl Policy {
    /// Uniform fallback policy.
    pub fn uniform() -> Self {
        Self {
            version: "uniform-v0".to_string(),
            layers: Vec::new(),
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.layers.is_empty()
    }

    /// Load the artifact from disk. Absent file -> uniform fallback;
    /// unparseable or dimensionally inconsistent file -> error (fatal
    /// at startup).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "policy artifact missing, using uniform allocation");
            return Ok(Self::uniform());
        }
        let raw = std::fs::read_to_string(path)?;
        let dto: ArtifactDto =
            serde_json::from_str(&raw).map_err(|e| PolicyError::Corrupt(e.to_string()))?;
        Self::from_dto(dto)
    }

    fn from_dto(dto: ArtifactDto) -> Result<Self, PolicyError> {
        if dto.layers.is_empty() {
            return Err(PolicyError::Corrupt("no layers".to_string()));
        }

        let mut layers = Vec::with_capacity(dto.layers.len());
        let mut in_dim = FEATURE_DIM;
        for (i, layer) in dto.layers.iter().enumerate() {
            let rows = layer.weights.len();
            if rows == 0 || layer.bias.len() != rows {
                return Err(PolicyError::Corrupt(format!(
                    "layer {i}: bias/weight row mismatch"
                )));
            }
            if layer.weights.iter().any(|r| r.len() != in_dim) {
                return Err(PolicyError::Corrupt(format!(
                    "layer {i}: expected input width {in_dim}"
                )));
            }
            let flat: Vec<f64> = layer.weights.iter().flatten().copied().collect();
            layers.push(Layer {
                weights: DMatrix::from_row_slice(rows, in_dim, &flat),
                bias: DVector::from_column_slice(&layer.bias),
            });
            in_dim = rows;
        }
        if in_dim != NUM_META_GROUPS {
            return Err(PolicyError::Corrupt(format!(
                "head width {in_dim}, expected {NUM_META_GROUPS}"
            )));
        }

        let version = dto.version.unwrap_or_else(|| "unversioned".to_string());
        info!(version = %version, layers = layers.len(), "policy artifact loaded");
        Ok(Self { version, layers })
    }

    /// Artifact version stamped onto trades and audit rows.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Deterministic inference: features -> raw nine-way allocation.
    pub fn infer(&self, features: &FeatureVector) -> [f64; NUM_META_GROUPS] {
        if self.layers.is_empty() {
            return [1.0 / NUM_META_GROUPS as f64; NUM_META_GROUPS];
        }
        let mut x = DVector::from_column_slice(features.as_slice());
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = &layer.weights * x + &layer.bias;
            if i < last {
                x.apply(|v| *v = v.tanh());
            }
        }
        softmax(x.as_slice())
    }
}

fn softmax(logits: &[f64]) -> [f64; NUM_META_GROUPS] {
    let mut out = [0.0; NUM_META_GROUPS];
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for (i, &l) in logits.iter().take(NUM_META_GROUPS).enumerate() {
        let e = (l - max).exp();
        out[i] = e;
        sum += e;
    }
    if sum > 0.0 {
        for v in &mut out {
            *v /= sum;
        }
    } else {
        out = [1.0 / NUM_META_GROUPS as f64; NUM_META_GROUPS];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn artifact_json(hidden: usize) -> String {
        // One hidden layer of `hidden` units, nine-way head.
        let l1: Vec<Vec<f64>> = (0..hidden)
            .map(|i| (0..FEATURE_DIM).map(|j| ((i + j) % 3) as f64 * 0.1).collect())
            .collect();
        let l2: Vec<Vec<f64>> = (0..NUM_META_GROUPS)
            .map(|i| (0..hidden).map(|j| ((i * j) % 5) as f64 * 0.05).collect())
            .collect();
        serde_json::json!({
            "version": "sac-actor-17",
            "layers": [
                {"weights": l1, "bias": vec![0.0; hidden]},
                {"weights": l2, "bias": vec![0.1; NUM_META_GROUPS]},
            ]
        })
        .to_string()
    }

    #[test]
    fn test_missing_artifact_is_uniform() {
        let policy = Policy::load("/nonexistent/policy.json").unwrap();
        assert!(policy.is_uniform());
        let out = policy.infer(&FeatureVector::zeros());
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(policy.version(), "uniform-v0");
    }

    #[test]
    fn test_corrupt_artifact_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        assert!(matches!(
            Policy::load(file.path()),
            Err(PolicyError::Corrupt(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // Head is eight-wide instead of nine.
        let bad = serde_json::json!({
            "layers": [
                {"weights": vec![vec![0.0; FEATURE_DIM]; 8], "bias": vec![0.0; 8]},
            ]
        });
        file.write_all(bad.to_string().as_bytes()).unwrap();
        assert!(matches!(
            Policy::load(file.path()),
            Err(PolicyError::Corrupt(_))
        ));
    }

    #[test]
    fn test_network_inference_deterministic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(artifact_json(16).as_bytes()).unwrap();
        let policy = Policy::load(file.path()).unwrap();
        assert_eq!(policy.version(), "sac-actor-17");
        assert!(!policy.is_uniform());

        let mut features = FeatureVector::zeros();
        features.0[0] = 1.04;
        features.0[5] = 1.3;
        let a = policy.infer(&features);
        let b = policy.infer(&features);
        assert_eq!(a, b);
        assert!((a.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(a.iter().all(|&w| w >= 0.0));
    }
}
