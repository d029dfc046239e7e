use super::{CONFIG_FILENAME, IMAGE_FILENAME, ImageSimulator, SimulatorError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, instrument};

const MAX_STDERR_CHARS: usize = 2000;

/// One program invocation of the parakeet pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// Sample construction, exit wave, optics, detector image, then MRC export.
pub const PIPELINE: [Stage; 5] = [
    Stage {
        program: "parakeet.sample.new",
        args: &["-c", CONFIG_FILENAME],
    },
    Stage {
        program: "parakeet.simulate.exit_wave",
        args: &["-c", CONFIG_FILENAME],
    },
    Stage {
        program: "parakeet.simulate.optics",
        args: &["-c", CONFIG_FILENAME],
    },
    Stage {
        program: "parakeet.simulate.image",
        args: &["-c", CONFIG_FILENAME],
    },
    Stage {
        program: "parakeet.export",
        args: &["image.h5", "-o", IMAGE_FILENAME],
    },
];

/// Runs the parakeet command-line programs, found on `PATH` or in `bin_dir`.
#[derive(Debug, Clone, Default)]
pub struct ParakeetSimulator {
    bin_dir: Option<PathBuf>,
}

impl ParakeetSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relative `bin_dir` is resolved against the current directory right away,
    /// since stages run inside their own working directories.
    pub fn with_bin_dir(bin_dir: impl Into<PathBuf>) -> Self {
        let bin_dir = bin_dir.into();
        Self {
            bin_dir: Some(std::path::absolute(&bin_dir).unwrap_or(bin_dir)),
        }
    }

    pub fn bin_dir(&self) -> Option<&Path> {
        self.bin_dir.as_deref()
    }

    fn program_path(&self, program: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        }
    }

    fn run_stage(&self, stage: &Stage, working_dir: &Path) -> Result<(), SimulatorError> {
        let program = self.program_path(stage.program);
        debug!(stage = stage.program, dir = %working_dir.display(), "Running simulator stage");

        let output = Command::new(&program)
            .args(stage.args)
            .current_dir(working_dir)
            .output()
            .map_err(|source| SimulatorError::Launch {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SimulatorError::StageFailed {
                stage: stage.program.to_string(),
                status: output.status.to_string(),
                stderr: stderr_tail(stderr.trim(), MAX_STDERR_CHARS).to_string(),
            });
        }
        Ok(())
    }
}

/// The last `max_chars` characters of `text`.
fn stderr_tail(text: &str, max_chars: usize) -> &str {
    match max_chars.checked_sub(1) {
        None => "",
        Some(last) => {
            let start = text.char_indices().rev().nth(last).map_or(0, |(i, _)| i);
            &text[start..]
        }
    }
}

impl ImageSimulator for ParakeetSimulator {
    #[instrument(level = "debug", skip_all, fields(dir = %working_dir.display()))]
    fn simulate(&self, working_dir: &Path) -> Result<PathBuf, SimulatorError> {
        for stage in &PIPELINE {
            self.run_stage(stage, working_dir)?;
        }
        let image = working_dir.join(IMAGE_FILENAME);
        if !image.is_file() {
            return Err(SimulatorError::MissingOutput(image));
        }
        Ok(image)
    }
}
