use super::config::SimulationConfig;
use nalgebra::{Quaternion, UnitQuaternion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::f64::consts::TAU;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("Failed to list structure files: {0}")]
    Scan(#[from] io::Error),
    #[error("No structure files found in '{}'", .0.display())]
    NoStructureFiles(PathBuf),
}

/// One row of sampled per-image parameters, before path resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledParameters {
    pub structure_file: PathBuf,
    pub rotation: UnitQuaternion<f64>,
    pub defocus: f64,
}

/// Seeded generators are reproducible; `None` draws a seed from OS entropy.
pub fn rng_from_seed(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Samples `n_images` parameter sets for a configuration.
///
/// All randomness comes from a single generator consumed in a fixed order: every
/// structure-file index first, then every rotation, then every defocus value. The
/// same `(config, seed)` pair therefore always yields the same sequence.
#[instrument(level = "debug", skip_all, fields(n_images = config.n_images(), seed = ?seed))]
pub fn sample(
    config: &SimulationConfig,
    seed: Option<u64>,
) -> Result<Vec<SampledParameters>, SamplingError> {
    let files = config.structure_files()?;
    if files.is_empty() {
        return Err(SamplingError::NoStructureFiles(
            config.input_directory().to_path_buf(),
        ));
    }
    let mut rng = rng_from_seed(seed);
    let range = config.defocus_range();
    Ok(sample_with_rng(
        &files,
        config.n_images(),
        (range.lower, range.upper),
        &mut rng,
    ))
}

/// Draws from an existing generator. `files` must not be empty.
pub fn sample_with_rng(
    files: &[PathBuf],
    n: usize,
    (lower, upper): (f64, f64),
    rng: &mut impl Rng,
) -> Vec<SampledParameters> {
    let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..files.len())).collect();
    let rotations: Vec<UnitQuaternion<f64>> = (0..n).map(|_| random_rotation(rng)).collect();
    let defoci: Vec<f64> = (0..n).map(|_| rng.gen_range(lower..=upper)).collect();

    indices
        .into_iter()
        .zip(rotations)
        .zip(defoci)
        .map(|((i, rotation), defocus)| SampledParameters {
            structure_file: files[i].clone(),
            rotation,
            defocus,
        })
        .collect()
}

/// Haar-uniform random rotation using Shoemake's subgroup algorithm.
pub fn random_rotation(rng: &mut impl Rng) -> UnitQuaternion<f64> {
    let u1: f64 = rng.gen_range(0.0..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let u3: f64 = rng.gen_range(0.0..1.0);

    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    let (s2, c2) = (TAU * u2).sin_cos();
    let (s3, c3) = (TAU * u3).sin_cos();

    UnitQuaternion::new_normalize(Quaternion::new(b * c3, a * s2, a * c2, b * s3))
}
