use super::parameters::SingleImageParameters;
use super::simulator::config::{ParakeetConfig, write_config};
use super::simulator::{CONFIG_FILENAME, ImageSimulator, SimulatorError};
use super::store::{ResultStore, StoreError};
use crate::core::io::cif::{CifError, CifFile};
use crate::core::io::mrc::{MrcError, read_mrc};
use crate::core::io::traits::WritableStructureFile;
use crate::core::io::{StructureIoError, read_structure};
use crate::core::utils::geometry::rotate_structure;
use nalgebra::UnitQuaternion;
use ndarray::{Array2, Axis};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Failed to create working directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    #[error("Failed to read structure: {0}")]
    StructureRead(#[from] StructureIoError),

    #[error("Structure '{}' contains no atoms", .0.display())]
    EmptyStructure(PathBuf),

    #[error("Failed to write rotated structure: {0}")]
    StructureWrite(#[from] CifError),

    #[error("Simulator error: {0}")]
    Simulator(#[from] SimulatorError),

    #[error("Failed to read simulated image: {0}")]
    Image(#[from] MrcError),

    #[error("Simulated image has shape {actual:?}, expected one {expected}x{expected} section")]
    ImageShape {
        expected: usize,
        actual: (usize, usize, usize),
    },

    #[error("Failed to store image: {0}")]
    Store(#[from] StoreError),
}

/// Loads a structure, rotates every model about its own centroid and saves the
/// result as mmCIF at `output`.
pub fn load_rotate_save(
    structure_file: &Path,
    rotation: &UnitQuaternion<f64>,
    output: &Path,
) -> Result<PathBuf, TaskError> {
    let mut structure = read_structure(structure_file)?;
    if structure.is_empty() {
        return Err(TaskError::EmptyStructure(structure_file.to_path_buf()));
    }
    rotate_structure(&mut structure, rotation, None);
    CifFile::write_to_path(&structure, output)?;
    Ok(output.to_path_buf())
}

/// Produces one image, start to finish.
///
/// All intermediate files live in a private temporary directory that is removed
/// on every exit path. The simulator's output is negated so that the particle is
/// dark on a light background. With `store` set, the image is also written into
/// the result store at the given index.
#[instrument(
    level = "debug",
    skip_all,
    fields(structure = %params.input_structure().display(), index = ?store.map(|(_, i)| i))
)]
pub fn simulate_image(
    params: &SingleImageParameters,
    fragment: &ParakeetConfig,
    sidelength: usize,
    simulator: &dyn ImageSimulator,
    store: Option<(&ResultStore, usize)>,
) -> Result<Array2<f32>, TaskError> {
    let working_dir = tempfile::Builder::new()
        .prefix("spsim-")
        .tempdir()
        .map_err(TaskError::WorkingDirectory)?;
    let dir = working_dir.path();

    load_rotate_save(
        params.input_structure(),
        params.rotation(),
        &dir.join(params.rotated_structure_filename()),
    )?;
    write_config(fragment, &dir.join(CONFIG_FILENAME))?;

    let image_path = simulator.simulate(dir)?;
    let image = read_single_section(&image_path, sidelength)?.mapv(|v| -v);

    if let Some((store, index)) = store {
        store.write_chunk(index, image.view())?;
        debug!(index, "Image stored");
    }
    Ok(image)
}

fn read_single_section(path: &Path, sidelength: usize) -> Result<Array2<f32>, TaskError> {
    let (_, data) = read_mrc(path)?;
    let shape = data.dim();
    if shape != (1, sidelength, sidelength) {
        return Err(TaskError::ImageShape {
            expected: sidelength,
            actual: shape,
        });
    }
    Ok(data.index_axis_move(Axis(0), 0))
}
