//! Trained model descriptors and the collaborators that resolve them.
//!
//! - `store`: the [`ModelStore`] lookup trait and an in-memory implementation
//! - `loader`: the [`ArtifactLoader`] that materializes model artifacts locally

pub mod loader;
pub mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ApproxError, Result};

pub use loader::ArtifactLoader;
pub use store::{InMemoryModelStore, ModelStore};

/// Kind of trained model. Only [`ModelType::Approximator`] is accepted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    Detector,
    Indexer,
    Analyzer,
    Segmenter,
    Approximator,
}

/// Approximation algorithm family.
///
/// Unrecognised tags are preserved in [`Algorithm::Unknown`] so that a bad
/// descriptor can be reported precisely instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Algorithm {
    /// Locally optimized product quantization: per-vector inline codes.
    Lopq,
    /// Linear projection: per-vector outputs collected into one matrix file.
    Pca,
    /// Native batched indexer serialized straight to an index file.
    Faiss,
    Unknown(String),
}

impl Algorithm {
    pub fn as_str(&self) -> &str {
        match self {
            Algorithm::Lopq => "LOPQ",
            Algorithm::Pca => "PCA",
            Algorithm::Faiss => "FAISS",
            Algorithm::Unknown(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Algorithm::Unknown(_))
    }

    /// Fail with [`ApproxError::UnknownAlgorithm`] for unrecognised tags.
    pub fn ensure_known(&self) -> Result<()> {
        match self {
            Algorithm::Unknown(tag) => Err(ApproxError::unknown_algorithm(format!(
                "no approximator variant for algorithm '{tag}'"
            ))),
            _ => Ok(()),
        }
    }
}

impl From<&str> for Algorithm {
    fn from(tag: &str) -> Self {
        match tag {
            "LOPQ" => Algorithm::Lopq,
            "PCA" => Algorithm::Pca,
            "FAISS" => Algorithm::Faiss,
            other => Algorithm::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Algorithm {
    fn from(tag: String) -> Self {
        Algorithm::from(tag.as_str())
    }
}

impl From<Algorithm> for String {
    fn from(algorithm: Algorithm) -> Self {
        algorithm.as_str().to_string()
    }
}

impl FromStr for Algorithm {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Algorithm::from(s))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable metadata about a trained model, owned by the external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub primary_key: u64,
    pub name: String,
    /// Hash of the model artifact content; unique across descriptors.
    pub content_checksum: String,
    pub algorithm: Algorithm,
    /// Locates the artifact directory under the models root.
    pub storage_identifier: String,
    pub model_type: ModelType,
}

impl ModelDescriptor {
    pub fn is_approximator(&self) -> bool {
        self.model_type == ModelType::Approximator
    }

    /// Fail with [`ApproxError::InvalidModelType`] unless this is an approximator.
    pub fn ensure_approximator(&self) -> Result<()> {
        if self.is_approximator() {
            Ok(())
        } else {
            Err(ApproxError::invalid_model_type(format!(
                "model '{}' (pk {}) is a {:?}, not an approximator",
                self.name, self.primary_key, self.model_type
            )))
        }
    }
}
