//! Model descriptor store.
//!
//! Descriptors are created and updated elsewhere; this crate only reads them
//! through [`ModelStore`]. [`InMemoryModelStore`] is a self-contained
//! implementation for embedding and tests.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::RwLock;

use crate::error::{ApproxError, Result};
use crate::model::{ModelDescriptor, ModelType};

/// Lookup interface onto durable model metadata.
pub trait ModelStore: Send + Sync + Debug {
    /// Find the unique descriptor of `model_type` named `name`.
    ///
    /// Fails with [`ApproxError::NotFound`] on zero or ambiguous matches.
    fn find_by_name(&self, name: &str, model_type: ModelType) -> Result<ModelDescriptor>;

    /// Find the unique descriptor of `model_type` with `checksum`.
    fn find_by_checksum(&self, checksum: &str, model_type: ModelType) -> Result<ModelDescriptor>;

    /// Fetch a descriptor by primary key, whatever its type.
    fn find_by_pk(&self, primary_key: u64) -> Result<ModelDescriptor>;

    /// Make sure the descriptor's artifacts exist in `model_dir`, fetching
    /// them if needed.
    fn ensure_local(&self, descriptor: &ModelDescriptor, model_dir: &Path) -> Result<()>;
}

/// Descriptor store held in memory.
///
/// When an artifact source is configured, `ensure_local` copies
/// `<artifact_source>/<storage_identifier>/` into the model directory the
/// first time it is requested.
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    descriptors: RwLock<HashMap<u64, ModelDescriptor>>,
    artifact_source: Option<PathBuf>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact_source(source: impl Into<PathBuf>) -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
            artifact_source: Some(source.into()),
        }
    }

    /// Register or replace a descriptor.
    ///
    /// A checksum already owned by another primary key is rejected.
    pub fn insert(&self, descriptor: ModelDescriptor) -> Result<()> {
        let mut guard = self.descriptors.write();
        if let Some(owner) = guard.values().find(|d| {
            d.content_checksum == descriptor.content_checksum
                && d.primary_key != descriptor.primary_key
        }) {
            return Err(ApproxError::invalid_argument(format!(
                "checksum {} already belongs to model pk {}",
                descriptor.content_checksum, owner.primary_key
            )));
        }
        guard.insert(descriptor.primary_key, descriptor);
        Ok(())
    }

    /// Rename a descriptor in place, as an external admin would.
    pub fn rename(&self, primary_key: u64, name: impl Into<String>) -> Result<()> {
        let mut guard = self.descriptors.write();
        let descriptor = guard
            .get_mut(&primary_key)
            .ok_or_else(|| ApproxError::not_found(format!("model pk {primary_key}")))?;
        descriptor.name = name.into();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_unique<F>(&self, what: &str, model_type: ModelType, predicate: F) -> Result<ModelDescriptor>
    where
        F: Fn(&ModelDescriptor) -> bool,
    {
        let guard = self.descriptors.read();
        let mut matches = guard
            .values()
            .filter(|d| d.model_type == model_type && predicate(d));
        match (matches.next(), matches.next()) {
            (Some(descriptor), None) => Ok(descriptor.clone()),
            (None, _) => Err(ApproxError::not_found(format!("{model_type:?} with {what}"))),
            (Some(_), Some(_)) => {
                warn!("ambiguous model lookup: several {model_type:?} models with {what}");
                Err(ApproxError::not_found(format!(
                    "{what} matches more than one {model_type:?}"
                )))
            }
        }
    }
}

impl ModelStore for InMemoryModelStore {
    fn find_by_name(&self, name: &str, model_type: ModelType) -> Result<ModelDescriptor> {
        self.find_unique(&format!("name '{name}'"), model_type, |d| d.name == name)
    }

    fn find_by_checksum(&self, checksum: &str, model_type: ModelType) -> Result<ModelDescriptor> {
        self.find_unique(&format!("checksum '{checksum}'"), model_type, |d| {
            d.content_checksum == checksum
        })
    }

    fn find_by_pk(&self, primary_key: u64) -> Result<ModelDescriptor> {
        self.descriptors
            .read()
            .get(&primary_key)
            .cloned()
            .ok_or_else(|| ApproxError::not_found(format!("model pk {primary_key}")))
    }

    fn ensure_local(&self, descriptor: &ModelDescriptor, model_dir: &Path) -> Result<()> {
        if model_dir.is_dir() {
            return Ok(());
        }
        let source = match &self.artifact_source {
            Some(root) => root.join(&descriptor.storage_identifier),
            None => {
                return Err(ApproxError::not_found(format!(
                    "artifacts for model '{}' are not present at {}",
                    descriptor.name,
                    model_dir.display()
                )));
            }
        };
        if !source.is_dir() {
            return Err(ApproxError::not_found(format!(
                "no artifact source for model '{}' at {}",
                descriptor.name,
                source.display()
            )));
        }

        debug!(
            "materializing artifacts for model '{}' from {}",
            descriptor.name,
            source.display()
        );
        // Copy into a sibling staging directory so a half-copied model is
        // never visible at `model_dir`.
        let staging = model_dir.with_extension(format!("partial-{}", uuid::Uuid::new_v4().simple()));
        if let Err(err) = copy_dir(&source, &staging) {
            if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                warn!(
                    "failed to remove staging directory {}: {cleanup}",
                    staging.display()
                );
            }
            return Err(err);
        }
        match std::fs::rename(&staging, model_dir) {
            Ok(()) => Ok(()),
            // Another process materialized it first.
            Err(_) if model_dir.is_dir() => {
                std::fs::remove_dir_all(&staging)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
