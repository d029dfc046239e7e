//! Progressive result store.
//!
//! A Zarr v2 directory holding a `(n_images, side, side)` half-precision array, one
//! uncompressed chunk file per image. Every chunk is written to a temporary file inside
//! the store and renamed into place, so a chunk file either exists complete or not at
//! all. Completion is therefore a directory listing, never a read of chunk data.

use half::f16;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};

const METADATA_FILENAME: &str = ".zarray";
const ZARR_FORMAT: u32 = 2;
const DTYPE: &str = "<f2";
const ORDER: &str = "C";
const FILL_VALUE: f32 = 0.0;
const BYTES_PER_VALUE: usize = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Refusing to overwrite existing path '{}'", .0.display())]
    AlreadyExists(PathBuf),

    #[error("'{}' is not a result store (no .zarray)", .0.display())]
    NotAStore(PathBuf),

    #[error("Malformed store metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Unsupported store layout: {0}")]
    Unsupported(String),

    #[error("Chunk index {index} is out of range for {len} chunks")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Image has shape {actual:?}, store expects {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Chunk {index} holds {actual} bytes, expected {expected}")]
    CorruptChunk {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArrayMetadata {
    zarr_format: u32,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    compressor: Option<serde_json::Value>,
    fill_value: f64,
    order: String,
    filters: Option<Vec<serde_json::Value>>,
}

impl ArrayMetadata {
    fn new(shape: [usize; 3], chunks: [usize; 3]) -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
            shape: shape.to_vec(),
            chunks: chunks.to_vec(),
            dtype: DTYPE.to_string(),
            compressor: None,
            fill_value: FILL_VALUE as f64,
            order: ORDER.to_string(),
            filters: None,
        }
    }

    /// Checks that this is a layout the store can read and write: a 3D uncompressed
    /// `<f2` array chunked as one full image per chunk.
    fn validate(&self) -> Result<[usize; 3], StoreError> {
        if self.zarr_format != ZARR_FORMAT {
            return Err(StoreError::Unsupported(format!(
                "zarr format {}",
                self.zarr_format
            )));
        }
        if self.dtype != DTYPE {
            return Err(StoreError::Unsupported(format!("dtype {}", self.dtype)));
        }
        if self.compressor.is_some() || self.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(StoreError::Unsupported("compressed chunks".to_string()));
        }
        if self.order != ORDER {
            return Err(StoreError::Unsupported(format!("order {}", self.order)));
        }
        let shape: [usize; 3] = self
            .shape
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Unsupported(format!("shape {:?}", self.shape)))?;
        if shape.contains(&0) {
            return Err(StoreError::Unsupported(format!("shape {shape:?}")));
        }
        if self.chunks != [1, shape[1], shape[2]] {
            return Err(StoreError::Unsupported(format!(
                "chunk shape {:?} for array shape {shape:?}",
                self.chunks
            )));
        }
        Ok(shape)
    }
}

/// Completion state of a store: `initialized` of `total` chunks written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreProgress {
    pub initialized: usize,
    pub total: usize,
}

impl StoreProgress {
    pub fn is_complete(&self) -> bool {
        self.initialized >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
    shape: [usize; 3],
}

impl ResultStore {
    /// Creates an empty store. Fails if anything already exists at `path`.
    pub fn create(
        path: impl AsRef<Path>,
        shape: [usize; 3],
        chunks: [usize; 3],
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let metadata = ArrayMetadata::new(shape, chunks);
        let shape = metadata.validate()?;

        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_path_buf()),
            _ => StoreError::Io(e),
        })?;

        let store = Self {
            path: path.to_path_buf(),
            shape,
        };
        store.write_atomically(METADATA_FILENAME, &serde_json::to_vec_pretty(&metadata)?)?;
        debug!(path = %path.display(), ?shape, "Created result store");
        Ok(store)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let bytes = match fs::read(path.join(METADATA_FILENAME)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotAStore(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: ArrayMetadata = serde_json::from_slice(&bytes)?;
        let shape = metadata.validate()?;
        Ok(Self {
            path: path.to_path_buf(),
            shape,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn chunks(&self) -> [usize; 3] {
        [1, self.shape[1], self.shape[2]]
    }

    /// Number of chunks, one per image.
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value reported for chunks that were never written.
    pub fn fill_value(&self) -> f32 {
        FILL_VALUE
    }

    fn image_shape(&self) -> (usize, usize) {
        (self.shape[1], self.shape[2])
    }

    fn chunk_key(index: usize) -> String {
        format!("{index}.0.0")
    }

    /// Only canonical keys count, so `01.0.0` or `+1.0.0` never alias a real chunk.
    fn parse_chunk_key(name: &str) -> Option<usize> {
        let index = name.strip_suffix(".0.0")?.parse().ok()?;
        (Self::chunk_key(index) == name).then_some(index)
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index >= self.len() {
            return Err(StoreError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    fn write_atomically(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.path)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path.join(key)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Stores one image at `index`, converting to half precision.
    pub fn write_chunk(&self, index: usize, image: ArrayView2<f32>) -> Result<(), StoreError> {
        self.check_index(index)?;
        if image.dim() != self.image_shape() {
            return Err(StoreError::ShapeMismatch {
                expected: self.image_shape(),
                actual: image.dim(),
            });
        }

        let mut bytes = Vec::with_capacity(image.len() * BYTES_PER_VALUE);
        for &value in image.iter() {
            bytes.extend_from_slice(&f16::from_f32(value).to_le_bytes());
        }
        self.write_atomically(&Self::chunk_key(index), &bytes)?;
        trace!(index, "Wrote chunk");
        Ok(())
    }

    /// Reads one image back, or `None` if its chunk has not been written.
    pub fn read_chunk(&self, index: usize) -> Result<Option<Array2<f32>>, StoreError> {
        self.check_index(index)?;
        let bytes = match fs::read(self.path.join(Self::chunk_key(index))) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (ny, nx) = self.image_shape();
        let expected = ny * nx * BYTES_PER_VALUE;
        if bytes.len() != expected {
            return Err(StoreError::CorruptChunk {
                index,
                expected,
                actual: bytes.len(),
            });
        }
        let values: Vec<f32> = bytes
            .chunks_exact(BYTES_PER_VALUE)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect();
        let image = Array2::from_shape_vec((ny, nx), values)
            .map_err(|e| StoreError::Unsupported(e.to_string()))?;
        Ok(Some(image))
    }

    pub fn is_initialized(&self, index: usize) -> Result<bool, StoreError> {
        self.check_index(index)?;
        Ok(self.path.join(Self::chunk_key(index)).is_file())
    }

    /// Counts written chunks from the directory listing alone.
    pub fn progress(&self) -> Result<StoreProgress, StoreError> {
        let total = self.len();
        let mut initialized = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name
                .to_str()
                .and_then(Self::parse_chunk_key)
                .is_some_and(|index| index < total)
            {
                initialized += 1;
            }
        }
        Ok(StoreProgress { initialized, total })
    }
}
