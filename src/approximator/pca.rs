//! PCA projection.
//!
//! Artifacts: `mean.npy` (D), `components.npy` (K x D) and, when whitening
//! was enabled at training time, `explained_variance.npy` (K).

use std::path::Path;

use log::info;

use crate::approximator::{Approximator, Code, OutputPlan};
use crate::data::VectorBlock;
use crate::error::{ApproxError, Result};
use crate::model::Algorithm;
use crate::util::distance::dot;
use crate::util::npy;

pub const PCA_MEAN_FILE: &str = "mean.npy";
pub const PCA_COMPONENTS_FILE: &str = "components.npy";
pub const PCA_VARIANCE_FILE: &str = "explained_variance.npy";

/// Linear projection onto the leading principal components.
#[derive(Debug)]
pub struct PcaApproximator {
    name: String,
    mean: Vec<f32>,
    components: VectorBlock,
    /// Per-component scale applied after projection (1/sqrt(variance)).
    whitening: Option<Vec<f32>>,
}

impl PcaApproximator {
    /// Load the projection stored in `model_dir`.
    pub fn load(name: impl Into<String>, model_dir: &Path) -> Result<Self> {
        let mean = npy::read_file(model_dir.join(PCA_MEAN_FILE))?.data;
        let components = npy::read_file(model_dir.join(PCA_COMPONENTS_FILE))?.into_block()?;

        let variance_path = model_dir.join(PCA_VARIANCE_FILE);
        let variance = if variance_path.is_file() {
            Some(npy::read_file(variance_path)?.data)
        } else {
            None
        };

        let pca = Self::new(name, mean, components, variance)?;
        info!(
            "loaded PCA approximator '{}' ({} -> {} dims) from {}",
            pca.name,
            pca.input_dimension(),
            pca.output_dimension(),
            model_dir.display()
        );
        Ok(pca)
    }

    pub fn new(
        name: impl Into<String>,
        mean: Vec<f32>,
        components: VectorBlock,
        explained_variance: Option<Vec<f32>>,
    ) -> Result<Self> {
        if components.rows() == 0 || components.dimension() == 0 {
            return Err(ApproxError::format("PCA model has no components"));
        }
        if mean.len() != components.dimension() {
            return Err(ApproxError::format(format!(
                "PCA mean has {} dims but components have {}",
                mean.len(),
                components.dimension()
            )));
        }

        let whitening = match explained_variance {
            Some(variance) => {
                if variance.len() != components.rows() {
                    return Err(ApproxError::format(format!(
                        "PCA variance has {} values for {} components",
                        variance.len(),
                        components.rows()
                    )));
                }
                if variance.iter().any(|&v| v.is_nan() || v <= 0.0) {
                    return Err(ApproxError::format(
                        "PCA explained variance must be strictly positive",
                    ));
                }
                Some(variance.iter().map(|v| 1.0 / v.sqrt()).collect())
            }
            None => None,
        };

        Ok(Self {
            name: name.into(),
            mean,
            components,
            whitening,
        })
    }

    pub fn input_dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn output_dimension(&self) -> usize {
        self.components.rows()
    }
}

impl Approximator for PcaApproximator {
    fn name(&self) -> &str {
        &self.name
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Pca
    }

    fn encode_one(&self, vector: &[f32]) -> Result<Code> {
        if vector.len() != self.input_dimension() {
            return Err(ApproxError::invalid_argument(format!(
                "PCA approximator '{}' expects {} dims, got {}",
                self.name,
                self.input_dimension(),
                vector.len()
            )));
        }

        let centered: Vec<f32> = vector.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
        let mut projected: Vec<f32> = self
            .components
            .iter_rows()
            .map(|component| dot(component, &centered))
            .collect();
        if let Some(scale) = &self.whitening {
            for (p, s) in projected.iter_mut().zip(scale) {
                *p *= s;
            }
        }
        Ok(Code::Projection(projected))
    }

    fn encode_batch(&self, _vectors: &VectorBlock, _path: &Path) -> Result<()> {
        Err(ApproxError::unsupported(format!(
            "PCA approximator '{}' projects vectors one at a time",
            self.name
        )))
    }

    fn describe_output(&self, row_count: usize) -> OutputPlan {
        OutputPlan::DenseMatrix {
            rows: row_count,
            dimension: self.output_dimension(),
        }
    }
}
