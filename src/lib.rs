//! # Iris Approx
//!
//! Approximate encodings for vector indexes.
//!
//! ## Features
//!
//! - Registry of trained approximators, loaded lazily and cached by
//!   primary key, name, or content checksum
//! - LOPQ inline codes, PCA projection matrices and FAISS-style IVF index files
//! - Batch pipeline turning raw index entries into approximate ones with
//!   full provenance
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use iris_approx::{
//!     ApproxConfig, ApproximationPipeline, ApproximatorRegistry, Event,
//!     InMemoryEventTracker, InMemoryModelStore, RawIndexEntry,
//! };
//!
//! # fn example(raw_entries: Vec<RawIndexEntry>) -> iris_approx::Result<()> {
//! let config = Arc::new(ApproxConfig::new("/srv/media"));
//! let store = Arc::new(InMemoryModelStore::new());
//! let registry = ApproximatorRegistry::new(config.clone(), store);
//!
//! let tracker = Arc::new(InMemoryEventTracker::new());
//! let pipeline = ApproximationPipeline::with_file_source(config, tracker);
//!
//! let (engine, descriptor) = registry.get_by_name("lopq-64")?;
//! pipeline.run(engine.as_ref(), &descriptor, &raw_entries, &Event::new())?;
//! # Ok(())
//! # }
//! ```

pub mod approximator;
pub mod config;
mod data;
mod error;
pub mod event;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod util;

// Re-exports for the public API
pub use approximator::{Approximator, ApproximatorFactory, Code, DefaultApproximatorFactory, OutputPlan};
pub use config::ApproxConfig;
pub use data::{ApproximateIndexEntry, EntryMetadata, Event, RawIndexEntry, VectorBlock};
pub use error::{ApproxError, Result};
pub use event::{EventResults, EventTracker, INDEX_ENTRIES_KEY, InMemoryEventTracker};
pub use model::{
    Algorithm, ArtifactLoader, InMemoryModelStore, ModelDescriptor, ModelStore, ModelType,
};
pub use pipeline::{ApproximationPipeline, FileIndexSource, IndexSource};
pub use registry::ApproximatorRegistry;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
