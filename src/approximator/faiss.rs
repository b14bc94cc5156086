//! FAISS-style batched indexer.
//!
//! The engine holds a trained coarse quantizer (`centroids.npy`, L x D).
//! [`Approximator::encode_batch`] assigns every row of a block to its
//! nearest list and serializes a ready-to-query IVF-flat index.
//!
//! ## Index file format
//!
//! All integers and floats are little-endian:
//!
//! ```text
//! [4 bytes: "IVFF"][u32: version][u32: dimension][u32: nlist][u64: ntotal]
//! [f32 * nlist * dimension: centroids]
//! per list: [u64: len][u64 * len: row ids][f32 * len * dimension: vectors]
//! [u32: crc32 of everything above]
//! ```

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};

use crate::approximator::{Approximator, Code, OutputPlan};
use crate::data::VectorBlock;
use crate::error::{ApproxError, Result};
use crate::model::Algorithm;
use crate::util::distance::nearest_centroid;
use crate::util::npy;

pub const FAISS_CENTROIDS_FILE: &str = "centroids.npy";

const INDEX_MAGIC: &[u8; 4] = b"IVFF";
const INDEX_VERSION: u32 = 1;

/// One inverted list: the rows assigned to a coarse centroid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvertedList {
    pub ids: Vec<u64>,
    pub vectors: Vec<f32>,
}

/// In-memory form of a serialized IVF-flat index.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfIndexFile {
    pub dimension: usize,
    pub centroids: VectorBlock,
    pub lists: Vec<InvertedList>,
}

impl IvfIndexFile {
    /// Total number of vectors across all lists.
    pub fn ntotal(&self) -> usize {
        self.lists.iter().map(|l| l.ids.len()).sum()
    }

    /// List holding row `id`, if any.
    pub fn list_of(&self, id: u64) -> Option<usize> {
        self.lists.iter().position(|l| l.ids.contains(&id))
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_all(INDEX_MAGIC)?;
        buf.write_u32::<LittleEndian>(INDEX_VERSION)?;
        buf.write_u32::<LittleEndian>(to_u32(self.dimension, "dimension")?)?;
        buf.write_u32::<LittleEndian>(to_u32(self.lists.len(), "list count")?)?;
        buf.write_u64::<LittleEndian>(self.ntotal() as u64)?;
        for &value in self.centroids.as_slice() {
            buf.write_f32::<LittleEndian>(value)?;
        }
        for list in &self.lists {
            buf.write_u64::<LittleEndian>(list.ids.len() as u64)?;
            for &id in &list.ids {
                buf.write_u64::<LittleEndian>(id)?;
            }
            for &value in &list.vectors {
                buf.write_f32::<LittleEndian>(value)?;
            }
        }
        let checksum = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(checksum)?;
        Ok(buf)
    }

    /// Write the index to `path`, syncing it to disk.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read and verify an index file.
    pub fn read(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.len() < INDEX_MAGIC.len() + 4 {
            return Err(ApproxError::format("index file is truncated"));
        }

        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != expected {
            return Err(ApproxError::format(format!(
                "index file {} failed its checksum",
                path.display()
            )));
        }

        let mut cursor = Cursor::new(body);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(ApproxError::format("not an IVF index file (bad magic)"));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(ApproxError::format(format!(
                "unsupported index version {version}"
            )));
        }

        let dimension = cursor.read_u32::<LittleEndian>()? as usize;
        let nlist = cursor.read_u32::<LittleEndian>()? as usize;
        let ntotal = cursor.read_u64::<LittleEndian>()? as usize;

        let mut centroids = vec![0.0f32; bounded_len(&cursor, nlist, dimension, 4)?];
        cursor.read_f32_into::<LittleEndian>(&mut centroids)?;
        let centroids = VectorBlock::new(nlist, dimension, centroids)?;

        let mut lists = Vec::new();
        for _ in 0..nlist {
            let len = usize::try_from(cursor.read_u64::<LittleEndian>()?)
                .map_err(|_| ApproxError::format("inverted list length exceeds usize"))?;
            let mut ids = vec![0u64; bounded_len(&cursor, len, 1, 8)?];
            cursor.read_u64_into::<LittleEndian>(&mut ids)?;
            let mut vectors = vec![0.0f32; bounded_len(&cursor, len, dimension, 4)?];
            cursor.read_f32_into::<LittleEndian>(&mut vectors)?;
            lists.push(InvertedList { ids, vectors });
        }
        if cursor.position() != body.len() as u64 {
            return Err(ApproxError::format("index file has trailing bytes"));
        }

        let index = Self {
            dimension,
            centroids,
            lists,
        };
        if index.ntotal() != ntotal {
            return Err(ApproxError::format(format!(
                "index header claims {ntotal} vectors, lists hold {}",
                index.ntotal()
            )));
        }
        Ok(index)
    }
}

/// Element count `count * width`, provided that many `item_size`-byte values
/// remain unread in `cursor`.
fn bounded_len(cursor: &Cursor<&[u8]>, count: usize, width: usize, item_size: usize) -> Result<usize> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    count
        .checked_mul(width)
        .filter(|&n| {
            n.checked_mul(item_size)
                .is_some_and(|bytes| bytes as u64 <= remaining)
        })
        .ok_or_else(|| {
            ApproxError::format(format!(
                "index declares {count}x{width} values but only {remaining} bytes remain"
            ))
        })
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ApproxError::invalid_argument(format!("{what} {value} exceeds u32::MAX")))
}

/// Batched IVF indexer over a trained coarse quantizer.
#[derive(Debug)]
pub struct FaissApproximator {
    name: String,
    centroids: VectorBlock,
}

impl FaissApproximator {
    /// Load the coarse quantizer stored in `model_dir`.
    pub fn load(name: impl Into<String>, model_dir: &Path) -> Result<Self> {
        let centroids = npy::read_file(model_dir.join(FAISS_CENTROIDS_FILE))?.into_block()?;
        let faiss = Self::new(name, centroids)?;
        info!(
            "loaded FAISS-style approximator '{}' ({} lists, {} dims) from {}",
            faiss.name,
            faiss.nlist(),
            faiss.dimension(),
            model_dir.display()
        );
        Ok(faiss)
    }

    pub fn new(name: impl Into<String>, centroids: VectorBlock) -> Result<Self> {
        if centroids.rows() == 0 || centroids.dimension() == 0 {
            return Err(ApproxError::format("FAISS-style model has no centroids"));
        }
        Ok(Self {
            name: name.into(),
            centroids,
        })
    }

    pub fn nlist(&self) -> usize {
        self.centroids.rows()
    }

    pub fn dimension(&self) -> usize {
        self.centroids.dimension()
    }

    /// Build the inverted lists for `vectors` without writing them.
    pub fn build_index(&self, vectors: &VectorBlock) -> Result<IvfIndexFile> {
        if vectors.rows() > 0 && vectors.dimension() != self.dimension() {
            return Err(ApproxError::invalid_argument(format!(
                "FAISS-style approximator '{}' expects {} dims, got {}",
                self.name,
                self.dimension(),
                vectors.dimension()
            )));
        }

        let centroids: Vec<&[f32]> = self.centroids.iter_rows().collect();
        let mut lists = vec![InvertedList::default(); self.nlist()];
        for (id, row) in vectors.iter_rows().enumerate() {
            let list = nearest_centroid(row, &centroids).ok_or_else(|| {
                ApproxError::invalid_argument(format!("row {id} contains NaN"))
            })?;
            lists[list].ids.push(id as u64);
            lists[list].vectors.extend_from_slice(row);
        }

        Ok(IvfIndexFile {
            dimension: self.dimension(),
            centroids: self.centroids.clone(),
            lists,
        })
    }
}

impl Approximator for FaissApproximator {
    fn name(&self) -> &str {
        &self.name
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Faiss
    }

    fn encode_one(&self, _vector: &[f32]) -> Result<Code> {
        Err(ApproxError::unsupported(format!(
            "FAISS-style approximator '{}' only encodes whole blocks",
            self.name
        )))
    }

    fn encode_batch(&self, vectors: &VectorBlock, path: &Path) -> Result<()> {
        let index = self.build_index(vectors)?;
        index.write(path)?;
        debug!(
            "wrote IVF index of {} vectors to {}",
            index.ntotal(),
            path.display()
        );
        Ok(())
    }

    fn describe_output(&self, row_count: usize) -> OutputPlan {
        OutputPlan::NativeIndex { rows: row_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_lists() -> FaissApproximator {
        let centroids = VectorBlock::from_rows(vec![vec![0.0, 0.0], vec![5.0, 5.0]]).unwrap();
        FaissApproximator::new("ivf-test", centroids).unwrap()
    }

    #[test]
    fn test_build_assigns_rows() {
        let faiss = two_lists();
        let block =
            VectorBlock::from_rows(vec![vec![0.1, 0.2], vec![4.0, 6.0], vec![-1.0, 0.5]]).unwrap();

        let index = faiss.build_index(&block).unwrap();
        assert_eq!(index.ntotal(), 3);
        assert_eq!(index.lists[0].ids, vec![0, 2]);
        assert_eq!(index.lists[1].ids, vec![1]);
        assert_eq!(index.lists[1].vectors, vec![4.0, 6.0]);
    }

    #[test]
    fn test_encode_batch_writes_verified_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.index");
        let faiss = two_lists();
        let block = VectorBlock::from_rows(vec![vec![0.1, 0.2], vec![4.0, 6.0]]).unwrap();

        faiss.encode_batch(&block, &path).unwrap();

        let index = IvfIndexFile::read(&path).unwrap();
        assert_eq!(index.dimension, 2);
        assert_eq!(index.ntotal(), 2);
        assert_eq!(index.list_of(1), Some(1));
        assert_eq!(index, faiss.build_index(&block).unwrap());
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.index");
        let faiss = two_lists();
        let block = VectorBlock::from_rows(vec![vec![0.1, 0.2]]).unwrap();
        faiss.encode_batch(&block, &path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            IvfIndexFile::read(&path),
            Err(ApproxError::Format(_))
        ));
    }

    /// Header + optional list prefix, sealed with a valid checksum.
    fn sealed_index(dimension: u32, nlist: u32, tail: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.write_u32::<LittleEndian>(INDEX_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(dimension).unwrap();
        buf.write_u32::<LittleEndian>(nlist).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();
        buf.extend_from_slice(tail);
        let checksum = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(checksum).unwrap();
        buf
    }

    #[test]
    fn test_oversized_header_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.index");

        std::fs::write(&path, sealed_index(u32::MAX, u32::MAX, &[])).unwrap();
        assert!(matches!(
            IvfIndexFile::read(&path),
            Err(ApproxError::Format(_))
        ));

        // One 2-dim centroid, then a list claiming ~2^62 rows.
        let mut tail = Vec::new();
        tail.write_f32::<LittleEndian>(0.0).unwrap();
        tail.write_f32::<LittleEndian>(0.0).unwrap();
        tail.write_u64::<LittleEndian>(1 << 62).unwrap();
        std::fs::write(&path, sealed_index(2, 1, &tail)).unwrap();
        assert!(matches!(
            IvfIndexFile::read(&path),
            Err(ApproxError::Format(_))
        ));
    }

    #[test]
    fn test_random_block_assigned_to_nearest_list() {
        use rand::Rng;

        use crate::util::distance::euclidean_squared;

        let mut rng = rand::rng();
        let mut random_rows = |n: usize| -> Vec<Vec<f32>> {
            (0..n)
                .map(|_| (0..8).map(|_| rng.random::<f32>()).collect())
                .collect()
        };
        let faiss =
            FaissApproximator::new("ivf-rand", VectorBlock::from_rows(random_rows(4)).unwrap())
                .unwrap();
        let block = VectorBlock::from_rows(random_rows(200)).unwrap();

        let index = faiss.build_index(&block).unwrap();
        assert_eq!(index.ntotal(), 200);
        for (id, row) in block.iter_rows().enumerate() {
            let list = index.list_of(id as u64).unwrap();
            let best = faiss
                .centroids
                .iter_rows()
                .map(|c| euclidean_squared(row, c))
                .fold(f32::INFINITY, f32::min);
            assert_eq!(euclidean_squared(row, faiss.centroids.row(list)), best);
        }
    }

    #[test]
    fn test_encode_one_unsupported() {
        let faiss = two_lists();
        assert!(matches!(
            faiss.encode_one(&[0.0, 0.0]),
            Err(ApproxError::UnsupportedOperation(_))
        ));
        assert_eq!(faiss.describe_output(4), OutputPlan::NativeIndex { rows: 4 });
    }

    #[test]
    fn test_dimension_mismatch() {
        let faiss = two_lists();
        let block = VectorBlock::from_rows(vec![vec![0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            faiss.build_index(&block),
            Err(ApproxError::InvalidArgument(_))
        ));
    }
}
