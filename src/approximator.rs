//! Approximation engines.
//!
//! An [`Approximator`] turns full-precision vectors into a compact
//! representation. The three families differ in what they produce:
//!
//! - `lopq`: a small code per vector, embedded inline in entry metadata
//! - `pca`: a projected vector per vector, collected into one matrix file
//! - `faiss`: a whole index structure serialized from the full block at once
//!
//! Callers ask [`Approximator::describe_output`] which of these applies
//! instead of branching on the algorithm name.

pub mod factory;
pub mod faiss;
pub mod lopq;
pub mod pca;

use std::fmt::Debug;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::VectorBlock;
use crate::error::Result;
use crate::model::Algorithm;

pub use factory::{ApproximatorFactory, DefaultApproximatorFactory};
pub use faiss::FaissApproximator;
pub use lopq::LopqApproximator;
pub use pca::PcaApproximator;

/// The encoded form of a single vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Code {
    /// Coarse cell per split plus one fine code per subquantizer.
    Lopq { coarse: Vec<u32>, fine: Vec<u32> },
    /// Projected vector.
    Projection(Vec<f32>),
}

/// How the output of an engine is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPlan {
    /// One code per row, stored in the row's metadata; no feature file.
    InlineCodes,
    /// One output vector per row, gathered into a `rows x dimension` matrix file.
    DenseMatrix { rows: usize, dimension: usize },
    /// The whole block is serialized by the engine into one index file.
    NativeIndex { rows: usize },
}

impl OutputPlan {
    /// File extension of the feature file, if the plan writes one.
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            OutputPlan::InlineCodes => None,
            OutputPlan::DenseMatrix { .. } => Some("npy"),
            OutputPlan::NativeIndex { .. } => Some("index"),
        }
    }
}

/// A loaded, ready-to-use approximation engine.
///
/// Engines are immutable once constructed and shared across concurrent
/// pipeline runs.
pub trait Approximator: Send + Sync + Debug {
    /// Human-readable model name used for diagnostics.
    fn name(&self) -> &str;

    /// Algorithm family this engine implements.
    fn algorithm(&self) -> Algorithm;

    /// Encode one vector.
    fn encode_one(&self, vector: &[f32]) -> Result<Code>;

    /// Encode a whole block, writing the serialized result to `path`.
    fn encode_batch(&self, vectors: &VectorBlock, path: &Path) -> Result<()>;

    /// Describe how the encoding of `row_count` vectors is persisted.
    fn describe_output(&self, row_count: usize) -> OutputPlan;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serializes_compactly() {
        let code = Code::Lopq {
            coarse: vec![3, 1],
            fine: vec![7, 0, 2, 5],
        };
        assert_eq!(
            serde_json::to_value(&code).unwrap(),
            serde_json::json!({"coarse": [3, 1], "fine": [7, 0, 2, 5]})
        );

        let code = Code::Projection(vec![0.5, -1.0]);
        assert_eq!(
            serde_json::to_value(&code).unwrap(),
            serde_json::json!([0.5, -1.0])
        );
    }

    #[test]
    fn test_output_plan_extensions() {
        assert_eq!(OutputPlan::InlineCodes.file_extension(), None);
        assert_eq!(
            OutputPlan::DenseMatrix {
                rows: 3,
                dimension: 2
            }
            .file_extension(),
            Some("npy")
        );
        assert_eq!(
            OutputPlan::NativeIndex { rows: 3 }.file_extension(),
            Some("index")
        );
    }
}
