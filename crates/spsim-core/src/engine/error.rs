use super::config::ConfigError;
use super::dispatch::DispatchError;
use super::parameters::ParameterError;
use super::sampling::SamplingError;
use super::simulator::SimulatorError;
use super::store::StoreError;
use super::task::TaskError;
use crate::core::io::mrc::MrcError;
use crate::core::io::star::StarError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid image parameters: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Parameter sampling failed: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Image index {index} is out of range for a simulation of {len} images")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Simulation has {actual} parameter sets but is configured for {expected} images")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("Simulator error: {0}")]
    Simulator(#[from] SimulatorError),

    #[error("Task failed: {0}")]
    Task(#[from] TaskError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Failed to read or write metadata '{}': {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed simulation metadata: {0}")]
    MetadataFormat(#[from] serde_json::Error),

    #[error("MRC export failed: {0}")]
    Mrc(#[from] MrcError),

    #[error("STAR export failed: {0}")]
    Star(#[from] StarError),

    #[error("Gave up after {waited:?} with {initialized} of {total} images simulated")]
    Timeout {
        initialized: usize,
        total: usize,
        waited: Duration,
    },
}
