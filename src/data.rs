//! Records flowing through the approximation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApproxError, Result};

/// Arbitrary per-item metadata stored alongside each vector.
pub type EntryMetadata = serde_json::Map<String, serde_json::Value>;

/// A dense, row-major block of `rows` vectors with `dimension` components each.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBlock {
    rows: usize,
    dimension: usize,
    data: Vec<f32>,
}

impl VectorBlock {
    pub fn new(rows: usize, dimension: usize, data: Vec<f32>) -> Result<Self> {
        if rows.checked_mul(dimension) != Some(data.len()) {
            return Err(ApproxError::invalid_argument(format!(
                "vector block of {rows}x{dimension} cannot hold {} values",
                data.len()
            )));
        }
        Ok(Self {
            rows,
            dimension,
            data,
        })
    }

    /// Build a block from individual rows, which must share one dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(ApproxError::invalid_argument(format!(
                    "row {i} has {} components, expected {dimension}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), dimension, data)
    }

    /// Build a block from an arbitrary array shape.
    ///
    /// Axes of length one are squeezed away and the result is promoted to at
    /// least two dimensions: a single vector such as `(D,)` or `(1, D)`
    /// becomes a `1 x D` block. When the only axis longer than one is the
    /// leading axis of a higher-rank shape, as in `(N, 1)` or `(N, 1, 1)`,
    /// it counts rows and the block is `N x 1`.
    pub fn from_shape(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let squeezed: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
        let (rows, dimension) = match squeezed.as_slice() {
            [] => (1, if data.is_empty() { 0 } else { 1 }),
            [n] if shape.len() > 1 && shape[0] == *n => (*n, 1),
            [d] => (1, *d),
            [r, d] => (*r, *d),
            _ => {
                return Err(ApproxError::format(format!(
                    "cannot reduce array of shape {shape:?} to two dimensions"
                )));
            }
        };
        Self::new(rows, dimension, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// A previously built, full-precision index unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIndexEntry {
    /// Vector file (relative to the collection's index directory).
    pub features_file_name: String,
    /// Metadata file (relative to the collection's index directory).
    pub entries_file_name: String,
    pub indexer_checksum: String,
    pub count: usize,
    /// What was indexed, e.g. `"frames"` or `"regions"`.
    pub target: String,
    pub video_id: String,
}

/// An index unit whose vectors were encoded by an approximator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproximateIndexEntry {
    pub entries: Vec<EntryMetadata>,
    /// Empty when codes are stored inline in `entries`.
    pub features_file_name: String,
    pub indexer_checksum: String,
    pub approximator_checksum: String,
    pub count: usize,
    pub approximate: bool,
    pub target: String,
    pub video_id: String,
    /// Name of the approximator that produced this entry.
    pub algorithm: String,
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ApproximateIndexEntry {
    pub fn has_inline_codes(&self) -> bool {
        self.features_file_name.is_empty()
    }
}

/// The unit of work whose completion the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
}

impl Event {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn with_id(id: Uuid) -> Self {
        Self { id }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
