use crate::cli::ExecutorKind;
use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileSimulationConfig {
    #[serde(rename = "input-directory")]
    pub input_directory: Option<PathBuf>,
    #[serde(rename = "output-basename")]
    pub output_basename: Option<String>,
    #[serde(rename = "n-images")]
    pub n_images: Option<usize>,
    #[serde(rename = "image-sidelength")]
    pub image_sidelength: Option<usize>,
    #[serde(rename = "min-defocus")]
    pub min_defocus: Option<f64>,
    #[serde(rename = "max-defocus")]
    pub max_defocus: Option<f64>,
    pub seed: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileExecutionConfig {
    pub executor: Option<ExecutorKind>,
    pub threads: Option<usize>,
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: Option<u64>,
    /// Seconds.
    pub timeout: Option<u64>,
    #[serde(rename = "parakeet-bin-dir")]
    pub parakeet_bin_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileClusterConfig {
    pub partition: Option<String>,
    #[serde(rename = "cpus-per-task")]
    pub cpus_per_task: Option<u32>,
    pub memory: Option<String>,
    /// An empty string requests no generic resources.
    pub gres: Option<String>,
    #[serde(rename = "time-limit")]
    pub time_limit: Option<String>,
    #[serde(rename = "extra-args")]
    pub extra_args: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub simulation: Option<FileSimulationConfig>,
    pub execution: Option<FileExecutionConfig>,
    pub cluster: Option<FileClusterConfig>,
}

impl FileConfig {
    /// Loads a TOML config file. Relative paths inside it are taken relative to the
    /// file's own directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(sim) = self.simulation.as_mut() {
            if let Some(dir) = sim.input_directory.as_mut() {
                resolve(dir);
            }
            if let Some(basename) = sim.output_basename.as_mut() {
                if Path::new(basename.as_str()).is_relative() {
                    *basename = base.join(basename.as_str()).to_string_lossy().into_owned();
                }
            }
        }
        if let Some(dir) = self
            .execution
            .as_mut()
            .and_then(|e| e.parakeet_bin_dir.as_mut())
        {
            resolve(dir);
        }
    }
}
