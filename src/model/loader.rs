//! Local materialization of model artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::config::ApproxConfig;
use crate::error::{ApproxError, Result};
use crate::model::ModelDescriptor;
use crate::model::store::ModelStore;

/// Resolves a descriptor to a local artifact directory, asking the store to
/// fetch the artifacts when they are missing.
#[derive(Debug, Clone)]
pub struct ArtifactLoader {
    config: Arc<ApproxConfig>,
    store: Arc<dyn ModelStore>,
}

impl ArtifactLoader {
    pub fn new(config: Arc<ApproxConfig>, store: Arc<dyn ModelStore>) -> Self {
        Self { config, store }
    }

    /// Ensure the artifacts of `descriptor` exist locally and return their directory.
    pub fn materialize(&self, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        let model_dir = self.config.model_dir(&descriptor.storage_identifier)?;
        self.store.ensure_local(descriptor, &model_dir)?;
        if !model_dir.is_dir() {
            return Err(ApproxError::not_found(format!(
                "model '{}' has no artifact directory at {}",
                descriptor.name,
                model_dir.display()
            )));
        }
        debug!(
            "artifacts for model '{}' available at {}",
            descriptor.name,
            model_dir.display()
        );
        Ok(model_dir)
    }
}
