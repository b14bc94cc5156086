//! Filesystem layout configuration.
//!
//! All artifacts live below a single media root:
//!
//! ```text
//! <media_root>
//! ├── models/<storage_identifier>/   trained model artifacts
//! └── <video_id>/indexes/            raw and approximate index files
//! ```

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ApproxError, Result};

fn default_models_dir() -> String {
    "models".to_string()
}

fn default_indexes_dir() -> String {
    "indexes".to_string()
}

fn default_codes_key() -> String {
    "codes".to_string()
}

/// Configuration shared by the registry, the artifact loader and the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproxConfig {
    /// Root directory holding models and per-collection indexes.
    pub media_root: PathBuf,
    /// Directory (under the media root) holding model artifact directories.
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
    /// Directory (under each collection) holding index files.
    #[serde(default = "default_indexes_dir")]
    pub indexes_dir: String,
    /// Metadata key under which inline codes are stored.
    #[serde(default = "default_codes_key")]
    pub codes_key: String,
}

impl ApproxConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            models_dir: default_models_dir(),
            indexes_dir: default_indexes_dir(),
            codes_key: default_codes_key(),
        }
    }

    pub fn builder(media_root: impl Into<PathBuf>) -> ApproxConfigBuilder {
        ApproxConfigBuilder {
            config: Self::new(media_root),
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.media_root.as_os_str().is_empty() {
            return Err(ApproxError::invalid_config("media_root must not be empty"));
        }
        check_component("models_dir", &self.models_dir).map_err(as_config_error)?;
        check_component("indexes_dir", &self.indexes_dir).map_err(as_config_error)?;
        if self.codes_key.is_empty() {
            return Err(ApproxError::invalid_config("codes_key must not be empty"));
        }
        Ok(())
    }

    /// Directory holding the artifacts of the model stored under `storage_identifier`.
    pub fn model_dir(&self, storage_identifier: &str) -> Result<PathBuf> {
        check_component("storage identifier", storage_identifier)?;
        Ok(self
            .media_root
            .join(&self.models_dir)
            .join(storage_identifier))
    }

    /// Directory holding the index files of collection `video_id`.
    pub fn index_dir(&self, video_id: &str) -> Result<PathBuf> {
        check_component("video id", video_id)?;
        Ok(self.media_root.join(video_id).join(&self.indexes_dir))
    }
}

fn as_config_error(err: ApproxError) -> ApproxError {
    ApproxError::invalid_config(err.to_string())
}

/// Ensure `value` is a single, normal path component.
fn check_component(what: &str, value: &str) -> Result<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == value => Ok(()),
        _ => Err(ApproxError::invalid_argument(format!(
            "{what} '{value}' is not a valid path component"
        ))),
    }
}

/// Builder for [`ApproxConfig`].
#[derive(Debug, Clone)]
pub struct ApproxConfigBuilder {
    config: ApproxConfig,
}

impl ApproxConfigBuilder {
    pub fn models_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.models_dir = dir.into();
        self
    }

    pub fn indexes_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.indexes_dir = dir.into();
        self
    }

    pub fn codes_key(mut self, key: impl Into<String>) -> Self {
        self.config.codes_key = key.into();
        self
    }

    pub fn build(self) -> Result<ApproxConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = ApproxConfig::new("/srv/media");
        assert_eq!(
            config.model_dir("5f1c").unwrap(),
            PathBuf::from("/srv/media/models/5f1c")
        );
        assert_eq!(
            config.index_dir("42").unwrap(),
            PathBuf::from("/srv/media/42/indexes")
        );
    }

    #[test]
    fn test_rejects_traversal() {
        let config = ApproxConfig::new("/srv/media");
        assert!(config.model_dir("..").is_err());
        assert!(config.model_dir("a/b").is_err());
        assert!(config.index_dir("").is_err());
        assert!(config.index_dir(".").is_err());
    }

    #[test]
    fn test_builder_validates() {
        let config = ApproxConfig::builder("/srv/media")
            .indexes_dir("approx")
            .codes_key("pq")
            .build()
            .unwrap();
        assert_eq!(config.indexes_dir, "approx");
        assert_eq!(config.codes_key, "pq");

        let err = ApproxConfig::builder("/srv/media").models_dir("../up").build();
        assert!(matches!(err, Err(ApproxError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_json_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approx.json");
        std::fs::write(&path, r#"{"media_root": "/srv/media"}"#).unwrap();

        let config = ApproxConfig::from_json_file(&path).unwrap();
        assert_eq!(config, ApproxConfig::new("/srv/media"));
    }
}
