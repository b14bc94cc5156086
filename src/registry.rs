//! Approximator registry.
//!
//! Maps a model identity (primary key, name, or content checksum) to a
//! loaded [`Approximator`], constructing each engine at most once.
//!
//! # Caching
//!
//! Three caches are kept: name -> descriptor, checksum -> descriptor and
//! primary key -> engine. They only ever grow. A model renamed or
//! re-checksummed in the store after its first lookup keeps resolving to the
//! descriptor seen first; build a new registry to observe such changes.
//!
//! # Thread safety
//!
//! Cache reads go through [`parking_lot::RwLock`]. The first load of a
//! primary key is serialized by a per-key gate so concurrent first lookups
//! construct a single engine and all callers observe the same instance.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::approximator::{Approximator, ApproximatorFactory, DefaultApproximatorFactory};
use crate::config::ApproxConfig;
use crate::error::Result;
use crate::model::{ArtifactLoader, ModelDescriptor, ModelStore, ModelType};

/// A loaded engine together with the descriptor it was resolved from.
pub type Resolved = (Arc<dyn Approximator>, ModelDescriptor);

#[derive(Debug)]
pub struct ApproximatorRegistry {
    store: Arc<dyn ModelStore>,
    loader: ArtifactLoader,
    factory: Arc<dyn ApproximatorFactory>,
    by_name: RwLock<HashMap<String, ModelDescriptor>>,
    by_checksum: RwLock<HashMap<String, ModelDescriptor>>,
    by_primary_key: RwLock<HashMap<u64, Arc<dyn Approximator>>>,
    load_gates: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl ApproximatorRegistry {
    /// Create a registry using the built-in engine variants.
    pub fn new(config: Arc<ApproxConfig>, store: Arc<dyn ModelStore>) -> Self {
        Self::with_factory(config, store, Arc::new(DefaultApproximatorFactory))
    }

    /// Create a registry that builds engines through `factory`.
    pub fn with_factory(
        config: Arc<ApproxConfig>,
        store: Arc<dyn ModelStore>,
        factory: Arc<dyn ApproximatorFactory>,
    ) -> Self {
        Self {
            loader: ArtifactLoader::new(config, store.clone()),
            store,
            factory,
            by_name: RwLock::new(HashMap::new()),
            by_checksum: RwLock::new(HashMap::new()),
            by_primary_key: RwLock::new(HashMap::new()),
            load_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an approximator by its unique name.
    pub fn get_by_name(&self, name: &str) -> Result<Resolved> {
        let cached = self.by_name.read().get(name).cloned();
        let descriptor = match cached {
            Some(descriptor) => descriptor,
            None => {
                let descriptor = self.store.find_by_name(name, ModelType::Approximator)?;
                descriptor.ensure_approximator()?;
                self.by_name
                    .write()
                    .entry(name.to_string())
                    .or_insert(descriptor)
                    .clone()
            }
        };
        let engine = self.load_engine(&descriptor)?;
        Ok((engine, descriptor))
    }

    /// Resolve an approximator by the checksum of its artifact content.
    pub fn get_by_checksum(&self, checksum: &str) -> Result<Resolved> {
        let cached = self.by_checksum.read().get(checksum).cloned();
        let descriptor = match cached {
            Some(descriptor) => descriptor,
            None => {
                let descriptor = self
                    .store
                    .find_by_checksum(checksum, ModelType::Approximator)?;
                descriptor.ensure_approximator()?;
                self.by_checksum
                    .write()
                    .entry(checksum.to_string())
                    .or_insert(descriptor)
                    .clone()
            }
        };
        let engine = self.load_engine(&descriptor)?;
        Ok((engine, descriptor))
    }

    /// Resolve an approximator by primary key.
    ///
    /// The descriptor is always fetched from the store; only the engine is cached.
    pub fn get_by_primary_key(&self, primary_key: u64) -> Result<Resolved> {
        let descriptor = self.store.find_by_pk(primary_key)?;
        descriptor.ensure_approximator()?;
        let engine = self.load_engine(&descriptor)?;
        Ok((engine, descriptor))
    }

    /// Number of engines constructed so far.
    pub fn cached_engine_count(&self) -> usize {
        self.by_primary_key.read().len()
    }

    pub fn is_loaded(&self, primary_key: u64) -> bool {
        self.by_primary_key.read().contains_key(&primary_key)
    }

    fn cached_engine(&self, primary_key: u64) -> Option<Arc<dyn Approximator>> {
        self.by_primary_key.read().get(&primary_key).cloned()
    }

    fn load_engine(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Approximator>> {
        let pk = descriptor.primary_key;
        if let Some(engine) = self.cached_engine(pk) {
            debug!("approximator cache hit for pk {pk}");
            return Ok(engine);
        }

        let gate = self.load_gates.lock().entry(pk).or_default().clone();
        let _guard = gate.lock();

        // Another caller may have finished loading while we waited.
        if let Some(engine) = self.cached_engine(pk) {
            return Ok(engine);
        }

        descriptor.algorithm.ensure_known()?;
        let model_dir = self.loader.materialize(descriptor)?;
        let engine = self.factory.create(descriptor, &model_dir)?;
        info!(
            "constructed {} approximator '{}' for pk {pk}",
            descriptor.algorithm, descriptor.name
        );

        self.by_primary_key.write().insert(pk, engine.clone());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::approximator::{Code, OutputPlan};
    use crate::data::VectorBlock;
    use crate::error::ApproxError;
    use crate::model::{Algorithm, InMemoryModelStore};

    #[derive(Debug)]
    struct StubApproximator {
        name: String,
        algorithm: Algorithm,
    }

    impl Approximator for StubApproximator {
        fn name(&self) -> &str {
            &self.name
        }

        fn algorithm(&self) -> Algorithm {
            self.algorithm.clone()
        }

        fn encode_one(&self, vector: &[f32]) -> Result<Code> {
            Ok(Code::Projection(vector.to_vec()))
        }

        fn encode_batch(&self, _vectors: &VectorBlock, _path: &Path) -> Result<()> {
            Err(ApproxError::unsupported("stub"))
        }

        fn describe_output(&self, _row_count: usize) -> OutputPlan {
            OutputPlan::InlineCodes
        }
    }

    #[derive(Debug, Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl ApproximatorFactory for CountingFactory {
        fn create(
            &self,
            descriptor: &ModelDescriptor,
            _model_dir: &Path,
        ) -> Result<Arc<dyn Approximator>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubApproximator {
                name: descriptor.name.clone(),
                algorithm: descriptor.algorithm.clone(),
            }))
        }
    }

    fn descriptor(pk: u64, name: &str, algorithm: Algorithm, model_type: ModelType) -> ModelDescriptor {
        ModelDescriptor {
            primary_key: pk,
            name: name.to_string(),
            content_checksum: format!("sha-{pk}"),
            algorithm,
            storage_identifier: format!("uuid-{pk}"),
            model_type,
        }
    }

    struct Fixture {
        _media: tempfile::TempDir,
        store: Arc<InMemoryModelStore>,
        factory: Arc<CountingFactory>,
        registry: ApproximatorRegistry,
    }

    fn fixture(descriptors: Vec<ModelDescriptor>) -> Fixture {
        let media = tempfile::tempdir().unwrap();
        let config = Arc::new(ApproxConfig::new(media.path()));
        let store = Arc::new(InMemoryModelStore::new());
        for d in descriptors {
            std::fs::create_dir_all(config.model_dir(&d.storage_identifier).unwrap()).unwrap();
            store.insert(d).unwrap();
        }
        let factory = Arc::new(CountingFactory::default());
        let registry = ApproximatorRegistry::with_factory(config, store.clone(), factory.clone());
        Fixture {
            _media: media,
            store,
            factory,
            registry,
        }
    }

    #[test]
    fn test_same_instance_across_lookups() {
        let f = fixture(vec![descriptor(1, "lopq-a", Algorithm::Lopq, ModelType::Approximator)]);

        let (by_pk, _) = f.registry.get_by_primary_key(1).unwrap();
        let (by_name, d) = f.registry.get_by_name("lopq-a").unwrap();
        let (by_sum, _) = f.registry.get_by_checksum("sha-1").unwrap();

        assert!(Arc::ptr_eq(&by_pk, &by_name));
        assert!(Arc::ptr_eq(&by_pk, &by_sum));
        assert_eq!(d.primary_key, 1);
        assert_eq!(f.factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(f.registry.cached_engine_count(), 1);
        assert!(f.registry.is_loaded(1));
    }

    #[test]
    fn test_invalid_model_type() {
        let f = fixture(vec![descriptor(2, "inception", Algorithm::Pca, ModelType::Indexer)]);

        let result = f.registry.get_by_primary_key(2);
        assert!(matches!(result, Err(ApproxError::InvalidModelType(_))));
        assert_eq!(f.factory.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_name_lookup_ignores_other_types() {
        let f = fixture(vec![descriptor(2, "inception", Algorithm::Pca, ModelType::Indexer)]);

        let result = f.registry.get_by_name("inception");
        assert!(matches!(result, Err(ApproxError::NotFound(_))));
    }

    #[test]
    fn test_unknown_algorithm_is_not_cached() {
        let f = fixture(vec![descriptor(
            3,
            "mystery",
            Algorithm::Unknown("BOGUS".to_string()),
            ModelType::Approximator,
        )]);

        let result = f.registry.get_by_primary_key(3);
        assert!(matches!(result, Err(ApproxError::UnknownAlgorithm(_))));
        assert!(!f.registry.is_loaded(3));
        assert_eq!(f.factory.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rename_not_observed_after_first_lookup() {
        let f = fixture(vec![descriptor(4, "old-name", Algorithm::Pca, ModelType::Approximator)]);

        let (first, _) = f.registry.get_by_name("old-name").unwrap();
        f.store.rename(4, "new-name").unwrap();

        // The cached name still resolves, to the same engine.
        let (second, d) = f.registry.get_by_name("old-name").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(d.name, "old-name");
    }

    #[test]
    fn test_missing_artifacts_propagate() {
        let media = tempfile::tempdir().unwrap();
        let config = Arc::new(ApproxConfig::new(media.path()));
        let store = Arc::new(InMemoryModelStore::new());
        store
            .insert(descriptor(5, "absent", Algorithm::Lopq, ModelType::Approximator))
            .unwrap();
        let registry = ApproximatorRegistry::with_factory(
            config,
            store,
            Arc::new(CountingFactory::default()),
        );

        assert!(matches!(
            registry.get_by_primary_key(5),
            Err(ApproxError::NotFound(_))
        ));
        assert_eq!(registry.cached_engine_count(), 0);
    }
}
