//! NumPy `.npy` support for float matrices, on top of `ndarray-npy`.
//!
//! Arrays are read as `float32`, falling back to `float64` narrowed to f32.
//! Files are loaded whole and viewed in place first, so the shape declared
//! in the header is checked against the bytes actually present before any
//! element buffer is allocated. Writes are `float32`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use ndarray_npy::{
    ReadNpyExt, ReadableElement, ViewElement, ViewNpyError, ViewNpyExt, WriteNpyExt,
};

use crate::data::VectorBlock;
use crate::error::{ApproxError, Result};

/// A dense float array as read from a `.npy` file, in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    fn from_array(array: ArrayD<f32>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    /// Reduce the array to a two-dimensional vector block.
    pub fn into_block(self) -> Result<VectorBlock> {
        VectorBlock::from_shape(&self.shape, self.data)
    }
}

/// Decode a whole `.npy` file held in memory.
pub fn read_bytes(bytes: &[u8]) -> Result<NpyArray> {
    match read_as::<f32>(bytes) {
        Ok(array) => Ok(NpyArray::from_array(array)),
        Err(f32_err) => match read_as::<f64>(bytes) {
            Ok(array) => Ok(NpyArray::from_array(array.mapv(|x| x as f32))),
            Err(_) => Err(f32_err),
        },
    }
}

/// Read a `.npy` file.
pub fn read_file(path: impl AsRef<Path>) -> Result<NpyArray> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    read_bytes(&bytes).map_err(|err| match err {
        ApproxError::Format(msg) => {
            ApproxError::format(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

fn read_as<A>(bytes: &[u8]) -> Result<ArrayD<A>>
where
    A: ViewElement + ReadableElement + Clone,
{
    match ArrayViewD::<A>::view_npy(bytes) {
        Ok(view) => Ok(view.to_owned()),
        // Lengths were already validated; only the in-place cast failed.
        Err(ViewNpyError::MisalignedData) => ArrayD::<A>::read_npy(bytes)
            .map_err(|e| ApproxError::format(format!("invalid .npy data: {e}"))),
        Err(e) => Err(ApproxError::format(format!("invalid .npy data: {e}"))),
    }
}

/// Write `data` with the given `shape` as a float32 `.npy` array.
pub fn write_array<W: Write>(writer: W, shape: &[usize], data: &[f32]) -> Result<()> {
    let array = ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).map_err(|_| {
        ApproxError::invalid_argument(format!(
            "shape {shape:?} does not match {} values",
            data.len()
        ))
    })?;
    array
        .write_npy(writer)
        .map_err(|e| ApproxError::Io(std::io::Error::other(e.to_string())))
}

/// Write a vector block as a `rows x dimension` `.npy` file.
pub fn write_block(path: impl AsRef<Path>, block: &VectorBlock) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_array(
        &mut writer,
        &[block.rows(), block.dimension()],
        block.as_slice(),
    )?;
    writer.flush()?;
    Ok(())
}
