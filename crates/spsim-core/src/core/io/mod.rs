//! Provides input/output functionality for the file formats the simulation touches.
//!
//! Structure files (PDB, mmCIF) share the [`traits::StructureFile`] interface. Images are
//! read from and written to MRC files, and particle metadata is exported as RELION STAR
//! tables.

pub mod cif;
pub mod mrc;
pub mod pdb;
pub mod star;
pub mod traits;

use crate::core::models::structure::Structure;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructureIoError {
    #[error("PDB error: {0}")]
    Pdb(#[from] pdb::PdbError),
    #[error("mmCIF error: {0}")]
    Cif(#[from] cif::CifError),
    #[error("Unrecognized structure file extension for '{}'", .0.display())]
    UnknownFormat(std::path::PathBuf),
}

/// Reads a structure file, choosing the parser from the file extension.
pub fn read_structure<P: AsRef<Path>>(path: P) -> Result<Structure, StructureIoError> {
    use traits::StructureFile;

    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdb") => Ok(pdb::PdbFile::read_from_path(path)?),
        Some("cif") => Ok(cif::CifFile::read_from_path(path)?),
        _ => Err(StructureIoError::UnknownFormat(path.to_path_buf())),
    }
}
