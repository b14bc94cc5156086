//! Locally optimized product quantization (LOPQ).
//!
//! A vector is split into `V` coarse splits. Each split is assigned to its
//! nearest coarse centroid; the residual is optionally centered and rotated
//! by parameters local to that cell, then product-quantized by the split's
//! subquantizers. The resulting code is small enough to store inline.
//!
//! Model file (`lopq.json` in the artifact directory):
//!
//! ```text
//! {
//!   "coarse_centroids": [split][cell][component],
//!   "residual_means":   [split][cell][component]            (optional)
//!   "rotations":        [split][cell][row][component]       (optional)
//!   "subquantizers":    [split][subspace][centroid][component]
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::approximator::{Approximator, Code, OutputPlan};
use crate::data::VectorBlock;
use crate::error::{ApproxError, Result};
use crate::model::Algorithm;
use crate::util::distance::{dot, nearest_centroid};

/// File name of the serialized LOPQ model.
pub const LOPQ_MODEL_FILE: &str = "lopq.json";

type Centroids = Vec<Vec<f32>>;

/// Trained LOPQ parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LopqModel {
    pub coarse_centroids: Vec<Centroids>,
    #[serde(default)]
    pub residual_means: Option<Vec<Centroids>>,
    #[serde(default)]
    pub rotations: Option<Vec<Vec<Centroids>>>,
    pub subquantizers: Vec<Vec<Centroids>>,
}

impl LopqModel {
    /// Check every shape against the coarse split dimensions and return
    /// the per-split dimensions.
    fn validate(&self) -> Result<Vec<usize>> {
        if self.coarse_centroids.is_empty() {
            return Err(ApproxError::format("LOPQ model has no coarse splits"));
        }
        if self.subquantizers.len() != self.coarse_centroids.len() {
            return Err(ApproxError::format(format!(
                "LOPQ model has {} coarse splits but {} subquantizer groups",
                self.coarse_centroids.len(),
                self.subquantizers.len()
            )));
        }

        let mut split_dims = Vec::with_capacity(self.coarse_centroids.len());
        for (split, cells) in self.coarse_centroids.iter().enumerate() {
            let dim = uniform_dim(cells)
                .ok_or_else(|| ApproxError::format(format!("coarse split {split} is malformed")))?;

            if let Some(means) = &self.residual_means {
                let split_means = means.get(split).ok_or_else(|| {
                    ApproxError::format(format!("missing residual means for split {split}"))
                })?;
                if split_means.len() != cells.len() || uniform_dim(split_means) != Some(dim) {
                    return Err(ApproxError::format(format!(
                        "residual means for split {split} do not match its cells"
                    )));
                }
            }

            if let Some(rotations) = &self.rotations {
                let split_rotations = rotations.get(split).ok_or_else(|| {
                    ApproxError::format(format!("missing rotations for split {split}"))
                })?;
                let square = split_rotations
                    .iter()
                    .all(|r| r.len() == dim && uniform_dim(r) == Some(dim));
                if split_rotations.len() != cells.len() || !square {
                    return Err(ApproxError::format(format!(
                        "rotations for split {split} must be {dim}x{dim} per cell"
                    )));
                }
            }

            let mut covered = 0;
            for (subspace, codebook) in self.subquantizers[split].iter().enumerate() {
                covered += uniform_dim(codebook).ok_or_else(|| {
                    ApproxError::format(format!(
                        "subquantizer {subspace} of split {split} is malformed"
                    ))
                })?;
            }
            if covered != dim {
                return Err(ApproxError::format(format!(
                    "subquantizers of split {split} cover {covered} components, expected {dim}"
                )));
            }

            split_dims.push(dim);
        }
        Ok(split_dims)
    }
}

/// Dimension shared by every row, or `None` if empty, ragged or zero-width.
fn uniform_dim(rows: &[Vec<f32>]) -> Option<usize> {
    let dim = rows.first()?.len();
    (dim > 0 && rows.iter().all(|r| r.len() == dim)).then_some(dim)
}

/// LOPQ engine producing inline codes.
#[derive(Debug)]
pub struct LopqApproximator {
    name: String,
    model: LopqModel,
    split_dims: Vec<usize>,
    dimension: usize,
}

impl LopqApproximator {
    /// Load the model stored in `model_dir`.
    pub fn load(name: impl Into<String>, model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(LOPQ_MODEL_FILE);
        let file = File::open(&path)?;
        let model: LopqModel = serde_json::from_reader(BufReader::new(file))?;
        let approximator = Self::from_model(name, model)?;
        info!(
            "loaded LOPQ approximator '{}' ({} dims, {} splits) from {}",
            approximator.name,
            approximator.dimension,
            approximator.split_dims.len(),
            path.display()
        );
        Ok(approximator)
    }

    pub fn from_model(name: impl Into<String>, model: LopqModel) -> Result<Self> {
        let split_dims = model.validate()?;
        let dimension = split_dims.iter().sum();
        Ok(Self {
            name: name.into(),
            model,
            split_dims,
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_split(&self, split: usize, x: &[f32], cell: usize, fine: &mut Vec<u32>) -> Result<()> {
        let centroid = &self.model.coarse_centroids[split][cell];
        let mut residual: Vec<f32> = x.iter().zip(centroid).map(|(a, c)| a - c).collect();

        if let Some(means) = &self.model.residual_means {
            for (r, m) in residual.iter_mut().zip(&means[split][cell]) {
                *r -= m;
            }
        }
        if let Some(rotations) = &self.model.rotations {
            residual = rotations[split][cell]
                .iter()
                .map(|row| dot(row, &residual))
                .collect();
        }

        let mut offset = 0;
        for codebook in &self.model.subquantizers[split] {
            let width = codebook[0].len();
            let sub = &residual[offset..offset + width];
            let code = nearest_centroid(sub, codebook).ok_or_else(|| {
                ApproxError::invalid_argument("cannot quantize a vector containing NaN")
            })?;
            fine.push(code as u32);
            offset += width;
        }
        Ok(())
    }
}

impl Approximator for LopqApproximator {
    fn name(&self) -> &str {
        &self.name
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Lopq
    }

    fn encode_one(&self, vector: &[f32]) -> Result<Code> {
        if vector.len() != self.dimension {
            return Err(ApproxError::invalid_argument(format!(
                "LOPQ approximator '{}' expects {} dims, got {}",
                self.name,
                self.dimension,
                vector.len()
            )));
        }

        let mut coarse = Vec::with_capacity(self.split_dims.len());
        let mut fine = Vec::new();
        let mut offset = 0;
        for (split, &width) in self.split_dims.iter().enumerate() {
            let x = &vector[offset..offset + width];
            let cell = nearest_centroid(x, &self.model.coarse_centroids[split]).ok_or_else(|| {
                ApproxError::invalid_argument("cannot quantize a vector containing NaN")
            })?;
            coarse.push(cell as u32);
            self.encode_split(split, x, cell, &mut fine)?;
            offset += width;
        }

        Ok(Code::Lopq { coarse, fine })
    }

    fn encode_batch(&self, _vectors: &VectorBlock, _path: &Path) -> Result<()> {
        Err(ApproxError::unsupported(format!(
            "LOPQ approximator '{}' encodes vectors one at a time",
            self.name
        )))
    }

    fn describe_output(&self, _row_count: usize) -> OutputPlan {
        OutputPlan::InlineCodes
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 4-dim model: 2 splits of 2 dims, 2 cells each, 2 subspaces of 1 dim.
    pub(crate) fn sample_model() -> LopqModel {
        LopqModel {
            coarse_centroids: vec![
                vec![vec![0.0, 0.0], vec![10.0, 10.0]],
                vec![vec![0.0, 0.0], vec![-10.0, -10.0]],
            ],
            residual_means: None,
            rotations: None,
            subquantizers: vec![
                vec![vec![vec![-1.0], vec![1.0]], vec![vec![-1.0], vec![1.0]]],
                vec![vec![vec![-1.0], vec![1.0]], vec![vec![-1.0], vec![1.0]]],
            ],
        }
    }

    #[test]
    fn test_encode_one() {
        let lopq = LopqApproximator::from_model("lopq-test", sample_model()).unwrap();
        assert_eq!(lopq.dimension(), 4);

        let code = lopq.encode_one(&[11.0, 9.0, 0.5, -0.5]).unwrap();
        assert_eq!(
            code,
            Code::Lopq {
                coarse: vec![1, 0],
                fine: vec![1, 0, 1, 0],
            }
        );
    }

    #[test]
    fn test_rotation_and_means_applied() {
        let mut model = sample_model();
        // Swap the residual components of every cell in split 0.
        let swap = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        model.rotations = Some(vec![
            vec![swap.clone(), swap],
            vec![
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            ],
        ]);
        model.residual_means = Some(vec![
            vec![vec![0.0, 0.0], vec![0.0, 0.0]],
            vec![vec![2.0, 2.0], vec![0.0, 0.0]],
        ]);
        let lopq = LopqApproximator::from_model("lopq-rot", model).unwrap();

        let code = lopq.encode_one(&[0.5, -0.5, 1.5, 1.5]).unwrap();
        assert_eq!(
            code,
            Code::Lopq {
                coarse: vec![0, 0],
                // split 0: residual (0.5, -0.5) swapped -> (-0.5, 0.5)
                // split 1: residual (1.5, 1.5) minus mean 2 -> (-0.5, -0.5)
                fine: vec![0, 1, 0, 0],
            }
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let lopq = LopqApproximator::from_model("lopq-test", sample_model()).unwrap();
        assert!(matches!(
            lopq.encode_one(&[1.0, 2.0]),
            Err(ApproxError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encode_batch_unsupported() {
        let lopq = LopqApproximator::from_model("lopq-test", sample_model()).unwrap();
        let block = VectorBlock::from_rows(vec![vec![0.0; 4]]).unwrap();
        let result = lopq.encode_batch(&block, Path::new("/tmp/unused.index"));
        assert!(matches!(result, Err(ApproxError::UnsupportedOperation(_))));
        assert_eq!(lopq.describe_output(1), OutputPlan::InlineCodes);
    }

    #[test]
    fn test_rejects_uncovered_split() {
        let mut model = sample_model();
        model.subquantizers[1].pop();
        assert!(matches!(
            LopqApproximator::from_model("bad", model),
            Err(ApproxError::Format(_))
        ));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join(LOPQ_MODEL_FILE)).unwrap();
        serde_json::to_writer(file, &sample_model()).unwrap();

        let lopq = LopqApproximator::load("lopq-disk", dir.path()).unwrap();
        assert_eq!(lopq.name(), "lopq-disk");
        assert_eq!(lopq.algorithm(), Algorithm::Lopq);
    }
}
