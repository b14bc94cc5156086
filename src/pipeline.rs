//! Batch approximation pipeline.
//!
//! [`ApproximationPipeline::run`] converts raw index entries into approximate
//! ones with a single engine, in input order, then finalizes the event once.
//!
//! ```text
//! RawIndexEntry ── IndexSource::load_index ──> (VectorBlock, entries)
//!        │
//!        ├─ InlineCodes  : encode_one per row  -> entries[i]["codes"]
//!        ├─ DenseMatrix  : encode_one per row  -> <token>.npy
//!        └─ NativeIndex  : encode_batch(block) -> <token>.index
//!        │
//!        └──> ApproximateIndexEntry ── (all entries) ──> EventTracker::finalize
//! ```
//!
//! Any failure aborts the batch: nothing is finalized and the error is
//! returned unchanged. Files already written for earlier entries are left in
//! place and are not referenced by any record.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

use crate::approximator::{Approximator, Code, OutputPlan};
use crate::config::ApproxConfig;
use crate::data::{ApproximateIndexEntry, EntryMetadata, Event, RawIndexEntry, VectorBlock};
use crate::error::{ApproxError, Result};
use crate::event::{EventResults, EventTracker, INDEX_ENTRIES_KEY};
use crate::model::ModelDescriptor;
use crate::util::npy;

/// Loads the vectors and metadata of a raw index entry.
pub trait IndexSource: Send + Sync + Debug {
    fn load_index(&self, entry: &RawIndexEntry) -> Result<(VectorBlock, Vec<EntryMetadata>)>;
}

/// Reads raw indexes from `<media_root>/<video_id>/indexes/`.
///
/// Vectors are a `.npy` float array; entries are a JSON array of objects.
#[derive(Debug, Clone)]
pub struct FileIndexSource {
    config: Arc<ApproxConfig>,
}

impl FileIndexSource {
    pub fn new(config: Arc<ApproxConfig>) -> Self {
        Self { config }
    }
}

impl IndexSource for FileIndexSource {
    fn load_index(&self, entry: &RawIndexEntry) -> Result<(VectorBlock, Vec<EntryMetadata>)> {
        let dir = self.config.index_dir(&entry.video_id)?;
        let vectors = npy::read_file(dir.join(&entry.features_file_name))?.into_block()?;
        let bytes = std::fs::read(dir.join(&entry.entries_file_name))?;
        let entries: Vec<EntryMetadata> = serde_json::from_slice(&bytes)?;

        if entries.len() != entry.count || vectors.rows() != entry.count {
            return Err(ApproxError::format(format!(
                "index {} of video {} declares {} items but holds {} entries and {} vectors",
                entry.features_file_name,
                entry.video_id,
                entry.count,
                entries.len(),
                vectors.rows()
            )));
        }
        Ok((vectors, entries))
    }
}

/// Fresh filesystem-safe token for output file names.
fn new_token() -> String {
    Uuid::new_v4().to_string().replace('-', "_")
}

/// Orchestrates approximation of raw index entries.
#[derive(Debug, Clone)]
pub struct ApproximationPipeline {
    config: Arc<ApproxConfig>,
    source: Arc<dyn IndexSource>,
    tracker: Arc<dyn EventTracker>,
}

impl ApproximationPipeline {
    pub fn new(
        config: Arc<ApproxConfig>,
        source: Arc<dyn IndexSource>,
        tracker: Arc<dyn EventTracker>,
    ) -> Self {
        Self {
            config,
            source,
            tracker,
        }
    }

    /// Pipeline reading raw indexes from the media root.
    pub fn with_file_source(config: Arc<ApproxConfig>, tracker: Arc<dyn EventTracker>) -> Self {
        let source = Arc::new(FileIndexSource::new(config.clone()));
        Self::new(config, source, tracker)
    }

    /// Approximate `raw_entries` with `engine` and finalize `event`.
    pub fn run(
        &self,
        engine: &dyn Approximator,
        descriptor: &ModelDescriptor,
        raw_entries: &[RawIndexEntry],
        event: &Event,
    ) -> Result<()> {
        descriptor.algorithm.ensure_known()?;
        if engine.algorithm() != descriptor.algorithm {
            return Err(ApproxError::invalid_argument(format!(
                "engine '{}' implements {} but model '{}' is {}",
                engine.name(),
                engine.algorithm(),
                descriptor.name,
                descriptor.algorithm
            )));
        }

        let mut approximated = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            approximated.push(self.approximate_entry(engine, descriptor, raw, event)?);
        }

        info!(
            "approximated {} index entries with '{}' for event {}",
            approximated.len(),
            descriptor.name,
            event.id
        );
        let mut results = EventResults::new();
        results.insert(INDEX_ENTRIES_KEY.to_string(), approximated);
        self.tracker.finalize(event, results)
    }

    fn approximate_entry(
        &self,
        engine: &dyn Approximator,
        descriptor: &ModelDescriptor,
        raw: &RawIndexEntry,
        event: &Event,
    ) -> Result<ApproximateIndexEntry> {
        let token = new_token();
        let (vectors, mut entries) = self.source.load_index(raw)?;
        if entries.len() != vectors.rows() {
            return Err(ApproxError::format(format!(
                "index {} of video {} has {} entries for {} vectors",
                raw.features_file_name,
                raw.video_id,
                entries.len(),
                vectors.rows()
            )));
        }

        let plan = engine.describe_output(vectors.rows());
        let features_file_name = match plan {
            OutputPlan::InlineCodes => {
                for (row, entry) in vectors.iter_rows().zip(entries.iter_mut()) {
                    let code = engine.encode_one(row)?;
                    entry.insert(self.config.codes_key.clone(), serde_json::to_value(code)?);
                }
                String::new()
            }
            OutputPlan::DenseMatrix { rows, dimension } => {
                let mut data = Vec::with_capacity(rows * dimension);
                for row in vectors.iter_rows() {
                    match engine.encode_one(row)? {
                        Code::Projection(projected) if projected.len() == dimension => {
                            data.extend(projected)
                        }
                        other => {
                            return Err(ApproxError::internal(format!(
                                "engine '{}' returned {other:?} for a {dimension}-column matrix",
                                engine.name()
                            )));
                        }
                    }
                }
                let matrix = VectorBlock::new(rows, dimension, data)?;
                let (file_name, path) = self.output_path(raw, &token, plan)?;
                npy::write_block(&path, &matrix)?;
                file_name
            }
            OutputPlan::NativeIndex { .. } => {
                let (file_name, path) = self.output_path(raw, &token, plan)?;
                engine.encode_batch(&vectors, &path)?;
                file_name
            }
        };
        debug!(
            "approximated index {} of video {} ({} rows) -> {:?}",
            raw.features_file_name,
            raw.video_id,
            vectors.rows(),
            plan
        );

        Ok(ApproximateIndexEntry {
            entries,
            features_file_name,
            indexer_checksum: raw.indexer_checksum.clone(),
            approximator_checksum: descriptor.content_checksum.clone(),
            count: raw.count,
            approximate: true,
            target: raw.target.clone(),
            video_id: raw.video_id.clone(),
            algorithm: descriptor.name.clone(),
            event_id: event.id,
            created_at: Utc::now(),
        })
    }

    /// File name and full path of the feature file for `plan`.
    fn output_path(
        &self,
        raw: &RawIndexEntry,
        token: &str,
        plan: OutputPlan,
    ) -> Result<(String, PathBuf)> {
        let extension = plan
            .file_extension()
            .ok_or_else(|| ApproxError::internal(format!("{plan:?} writes no feature file")))?;
        let dir = self.config.index_dir(&raw.video_id)?;
        std::fs::create_dir_all(&dir)?;
        let file_name = format!("{token}.{extension}");
        let path = dir.join(&file_name);
        Ok((file_name, path))
    }
}
