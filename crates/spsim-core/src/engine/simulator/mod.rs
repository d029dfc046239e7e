//! The external image-formation simulator and its per-image configuration.

pub mod config;
pub mod parakeet;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the simulator configuration written into each working directory.
pub const CONFIG_FILENAME: &str = "parakeet_config.yaml";

/// Name of the final image the simulator leaves in the working directory.
pub const IMAGE_FILENAME: &str = "image.mrc";

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to serialize simulator configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to launch '{}': {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Simulator stage '{stage}' failed with {status}: {stderr}")]
    StageFailed {
        stage: String,
        status: String,
        stderr: String,
    },

    #[error("Simulator finished but produced no image at '{}'", .0.display())]
    MissingOutput(PathBuf),
}

/// Turns a prepared working directory into a single image.
///
/// The working directory already holds the rotated structure and [`CONFIG_FILENAME`]
/// when `simulate` is called. Implementations must run everything relative to that
/// directory and return the path of the produced MRC image.
pub trait ImageSimulator: Send + Sync {
    fn simulate(&self, working_dir: &Path) -> Result<PathBuf, SimulatorError>;
}
