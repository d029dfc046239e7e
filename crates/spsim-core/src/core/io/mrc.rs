//! MRC2014 image files.
//!
//! Reading supports the little-endian modes produced by common cryo-EM software
//! (0, 1, 2, 6 and 12); everything is converted to `f32`. Writing always produces
//! mode 2 (float32) files and streams sections so stacks never have to be held in memory.

use half::f16;
use ndarray::{Array3, ArrayView2};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

const HEADER_BYTES: usize = 1024;
const MAP_TAG: &[u8; 4] = b"MAP ";
const LITTLE_ENDIAN_STAMP: [u8; 4] = [0x44, 0x44, 0x00, 0x00];
const BIG_ENDIAN_MARKER: u8 = 0x11;
const NVERSION: i32 = 20140;
const MODE_FLOAT32: i32 = 2;

#[derive(Debug, Error)]
pub enum MrcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("File is too short to contain an MRC header")]
    TruncatedHeader,
    #[error("Invalid dimensions {nx} x {ny} x {nz}")]
    InvalidDimensions { nx: i32, ny: i32, nz: i32 },
    #[error("Header declares {expected} data bytes but only {available} follow it")]
    TruncatedData { expected: u64, available: u64 },
    #[error("Unsupported MRC mode {0}")]
    UnsupportedMode(i32),
    #[error("Big-endian MRC files are not supported")]
    UnsupportedByteOrder,
    #[error("Section has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Stack declared {expected} sections but {written} were written")]
    IncompleteStack { expected: usize, written: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MrcHeader {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub mode: i32,
    /// Pixel size in Angstroms along x, derived from the cell dimensions.
    pub voxel_size: f32,
}

fn read_i32(header: &[u8], word: usize) -> i32 {
    let offset = word * 4;
    i32::from_le_bytes([
        header[offset],
        header[offset + 1],
        header[offset + 2],
        header[offset + 3],
    ])
}

fn read_f32(header: &[u8], word: usize) -> f32 {
    f32::from_bits(read_i32(header, word) as u32)
}

fn bytes_per_value(mode: i32) -> Result<usize, MrcError> {
    match mode {
        0 => Ok(1),
        1 | 6 | 12 => Ok(2),
        2 => Ok(4),
        other => Err(MrcError::UnsupportedMode(other)),
    }
}

/// Reads an MRC file into an array of shape `(nz, ny, nx)`.
pub fn read_mrc<P: AsRef<Path>>(path: P) -> Result<(MrcHeader, Array3<f32>), MrcError> {
    let mut file = File::open(path)?;
    let mut header_bytes = vec![0u8; HEADER_BYTES];
    file.read_exact(&mut header_bytes).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => MrcError::TruncatedHeader,
        _ => MrcError::Io(e),
    })?;

    if header_bytes[212] == BIG_ENDIAN_MARKER {
        return Err(MrcError::UnsupportedByteOrder);
    }

    let (nx, ny, nz) = (
        read_i32(&header_bytes, 0),
        read_i32(&header_bytes, 1),
        read_i32(&header_bytes, 2),
    );
    if nx <= 0 || ny <= 0 || nz <= 0 {
        return Err(MrcError::InvalidDimensions { nx, ny, nz });
    }
    let mode = read_i32(&header_bytes, 3);
    let width = bytes_per_value(mode)?;
    let mx = read_i32(&header_bytes, 7);
    let cell_x = read_f32(&header_bytes, 10);
    let extended_header_bytes = read_i32(&header_bytes, 23).max(0) as u64;

    let header = MrcHeader {
        nx: nx as usize,
        ny: ny as usize,
        nz: nz as usize,
        mode,
        voxel_size: if mx > 0 { cell_x / mx as f32 } else { 1.0 },
    };

    let expected = (nx as u64)
        .checked_mul(ny as u64)
        .and_then(|n| n.checked_mul(nz as u64))
        .and_then(|n| n.checked_mul(width as u64))
        .ok_or(MrcError::InvalidDimensions { nx, ny, nz })?;
    let available = file
        .metadata()?
        .len()
        .saturating_sub(HEADER_BYTES as u64 + extended_header_bytes);
    if expected > available {
        return Err(MrcError::TruncatedData {
            expected,
            available,
        });
    }

    file.seek(SeekFrom::Current(extended_header_bytes as i64))?;
    let mut raw = vec![0u8; expected as usize];
    file.read_exact(&mut raw)?;

    let values: Vec<f32> = match mode {
        0 => raw.iter().map(|&b| b as i8 as f32).collect(),
        1 => raw
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32)
            .collect(),
        2 => raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        6 => raw
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32)
            .collect(),
        12 => raw
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => return Err(MrcError::UnsupportedMode(other)),
    };

    let data = Array3::from_shape_vec((header.nz, header.ny, header.nx), values)
        .map_err(|_| MrcError::InvalidDimensions { nx, ny, nz })?;
    Ok((header, data))
}

#[derive(Debug, Default)]
struct RunningStats {
    count: u64,
    min: f32,
    max: f32,
    sum: f64,
    sum_squares: f64,
}

impl RunningStats {
    fn push(&mut self, value: f32) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value as f64;
        self.sum_squares += (value as f64) * (value as f64);
    }

    fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    fn rms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_squares / self.count as f64 - mean * mean).max(0.0).sqrt()
    }
}

/// Streams 2D sections into a float32 MRC stack.
///
/// The header is written twice: a placeholder on creation and the final version,
/// with density statistics, in [`MrcStackWriter::finish`].
pub struct MrcStackWriter {
    writer: BufWriter<File>,
    nx: usize,
    ny: usize,
    nz: usize,
    voxel_size: f32,
    written: usize,
    stats: RunningStats,
}

impl MrcStackWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        nx: usize,
        ny: usize,
        nz: usize,
        voxel_size: f32,
    ) -> Result<Self, MrcError> {
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(MrcError::InvalidDimensions {
                nx: nx as i32,
                ny: ny as i32,
                nz: nz as i32,
            });
        }
        let file = File::create(path)?;
        let mut stack = Self {
            writer: BufWriter::new(file),
            nx,
            ny,
            nz,
            voxel_size,
            written: 0,
            stats: RunningStats::default(),
        };
        let placeholder = stack.header_bytes();
        stack.writer.write_all(&placeholder)?;
        Ok(stack)
    }

    /// Appends one section of shape `(ny, nx)`.
    pub fn push(&mut self, section: ArrayView2<f32>) -> Result<(), MrcError> {
        if section.dim() != (self.ny, self.nx) {
            return Err(MrcError::ShapeMismatch {
                expected: (self.ny, self.nx),
                actual: section.dim(),
            });
        }
        for &value in section.iter() {
            self.stats.push(value);
            self.writer.write_all(&value.to_le_bytes())?;
        }
        self.written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), MrcError> {
        if self.written != self.nz {
            return Err(MrcError::IncompleteStack {
                expected: self.nz,
                written: self.written,
            });
        }
        let header = self.header_bytes();
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&header)?;
        self.writer.flush()?;
        Ok(())
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_BYTES];
        let mut put_i32 = |word: usize, value: i32| {
            header[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
        };
        put_i32(0, self.nx as i32);
        put_i32(1, self.ny as i32);
        put_i32(2, self.nz as i32);
        put_i32(3, MODE_FLOAT32);
        put_i32(7, self.nx as i32);
        put_i32(8, self.ny as i32);
        put_i32(9, self.nz as i32);
        put_i32(16, 1);
        put_i32(17, 2);
        put_i32(18, 3);
        put_i32(27, NVERSION);

        let mut put_f32 = |word: usize, value: f32| {
            header[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
        };
        put_f32(10, self.nx as f32 * self.voxel_size);
        put_f32(11, self.ny as f32 * self.voxel_size);
        put_f32(12, self.nz as f32 * self.voxel_size);
        put_f32(13, 90.0);
        put_f32(14, 90.0);
        put_f32(15, 90.0);
        put_f32(19, self.stats.min);
        put_f32(20, self.stats.max);
        put_f32(21, self.stats.mean() as f32);
        put_f32(54, self.stats.rms() as f32);

        header[208..212].copy_from_slice(MAP_TAG);
        header[212..216].copy_from_slice(&LITTLE_ENDIAN_STAMP);
        header
    }
}

/// Writes a whole `(nz, ny, nx)` array as a float32 MRC file.
pub fn write_mrc<P: AsRef<Path>>(path: P, data: &Array3<f32>, voxel_size: f32) -> Result<(), MrcError> {
    let (nz, ny, nx) = data.dim();
    let mut writer = MrcStackWriter::create(path, nx, ny, nz, voxel_size)?;
    for section in data.outer_iter() {
        writer.push(section)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::tempdir;

    #[test]
    fn written_stack_is_read_back_with_same_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.mrcs");
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);

        write_mrc(&path, &data, 1.5).unwrap();
        let (header, read) = read_mrc(&path).unwrap();

        assert_eq!((header.nz, header.ny, header.nx), (3, 4, 5));
        assert_eq!(header.mode, 2);
        assert!((header.voxel_size - 1.5).abs() < 1e-6);
        assert_eq!(read, data);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            (HEADER_BYTES + 3 * 4 * 5 * 4) as u64
        );
    }

    #[test]
    fn header_records_density_statistics() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.mrc");
        let data = Array3::from_shape_vec((1, 1, 4), vec![-1.0, 1.0, 3.0, 5.0]).unwrap();

        write_mrc(&path, &data, 1.0).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        assert_eq!(read_f32(&bytes, 19), -1.0);
        assert_eq!(read_f32(&bytes, 20), 5.0);
        assert_eq!(read_f32(&bytes, 21), 2.0);
        assert_eq!(&bytes[208..212], MAP_TAG);
    }

    #[test]
    fn pushing_wrong_shape_is_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = MrcStackWriter::create(dir.path().join("x.mrcs"), 4, 4, 1, 1.0).unwrap();
        let result = writer.push(Array2::<f32>::zeros((3, 4)).view());
        assert!(matches!(result, Err(MrcError::ShapeMismatch { .. })));
    }

    #[test]
    fn finishing_incomplete_stack_is_an_error() {
        let dir = tempdir().unwrap();
        let mut writer = MrcStackWriter::create(dir.path().join("x.mrcs"), 2, 2, 2, 1.0).unwrap();
        writer.push(Array2::<f32>::zeros((2, 2)).view()).unwrap();
        assert!(matches!(
            writer.finish(),
            Err(MrcError::IncompleteStack {
                expected: 2,
                written: 1
            })
        ));
    }

    #[test]
    fn reads_half_precision_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("half.mrc");
        let mut bytes = vec![0u8; HEADER_BYTES];
        bytes[0..4].copy_from_slice(&2i32.to_le_bytes());
        bytes[4..8].copy_from_slice(&1i32.to_le_bytes());
        bytes[8..12].copy_from_slice(&1i32.to_le_bytes());
        bytes[12..16].copy_from_slice(&12i32.to_le_bytes());
        for value in [0.5f32, -2.0] {
            bytes.extend_from_slice(&f16::from_f32(value).to_le_bytes());
        }
        std::fs::write(&path, bytes).unwrap();

        let (header, data) = read_mrc(&path).unwrap();

        assert_eq!(header.mode, 12);
        assert_eq!(data[[0, 0, 0]], 0.5);
        assert_eq!(data[[0, 0, 1]], -2.0);
    }

    #[test]
    fn truncated_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.mrc");
        std::fs::write(&path, [0u8; 100]).unwrap();
        assert!(matches!(read_mrc(&path), Err(MrcError::TruncatedHeader)));
    }

    fn header_only(nx: i32, ny: i32, nz: i32, mode: i32) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_BYTES];
        for (word, value) in [nx, ny, nz, mode].into_iter().enumerate() {
            bytes[word * 4..word * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn huge_declared_dimensions_fail_before_allocating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.mrc");
        let mut bytes = header_only(i32::MAX, i32::MAX, i32::MAX, 2);
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read_mrc(&path),
            Err(MrcError::InvalidDimensions { .. } | MrcError::TruncatedData { .. })
        ));
    }

    #[test]
    fn short_data_block_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.mrc");
        let mut bytes = header_only(64, 64, 1, 2);
        bytes.extend_from_slice(&[0u8; 100]);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read_mrc(&path),
            Err(MrcError::TruncatedData {
                expected: 16384,
                available: 100
            })
        ));
    }
}
