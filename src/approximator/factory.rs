//! Factory for constructing approximation engines from descriptors.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::approximator::Approximator;
use crate::approximator::faiss::FaissApproximator;
use crate::approximator::lopq::LopqApproximator;
use crate::approximator::pca::PcaApproximator;
use crate::error::{ApproxError, Result};
use crate::model::{Algorithm, ModelDescriptor};

/// Builds the engine variant matching a descriptor's algorithm.
///
/// Construction loads model state and is expensive; the registry calls
/// `create` at most once per primary key.
pub trait ApproximatorFactory: Send + Sync + Debug {
    fn create(
        &self,
        descriptor: &ModelDescriptor,
        model_dir: &Path,
    ) -> Result<Arc<dyn Approximator>>;
}

/// Factory for the built-in LOPQ, PCA and FAISS-style engines.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultApproximatorFactory;

impl ApproximatorFactory for DefaultApproximatorFactory {
    fn create(
        &self,
        descriptor: &ModelDescriptor,
        model_dir: &Path,
    ) -> Result<Arc<dyn Approximator>> {
        let name = descriptor.name.as_str();
        let approximator: Arc<dyn Approximator> = match &descriptor.algorithm {
            Algorithm::Lopq => Arc::new(LopqApproximator::load(name, model_dir)?),
            Algorithm::Pca => Arc::new(PcaApproximator::load(name, model_dir)?),
            Algorithm::Faiss => Arc::new(FaissApproximator::load(name, model_dir)?),
            Algorithm::Unknown(tag) => {
                return Err(ApproxError::unknown_algorithm(format!(
                    "model '{}' (pk {}) uses unknown approximator type '{tag}'",
                    descriptor.name, descriptor.primary_key
                )));
            }
        };
        Ok(approximator)
    }
}
