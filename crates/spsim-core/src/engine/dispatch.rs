//! Fire-and-forget task submission.
//!
//! A dispatcher hands one image index at a time to some worker and returns at once.
//! Nothing is awaited and nothing is resubmitted: the result store is the only place
//! where completion, or its absence, becomes visible.

use super::simulation::Simulation;
use super::simulator::ImageSimulator;
use super::store::ResultStore;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to locate the spsim executable: {0}")]
    CurrentExecutable(#[source] io::Error),

    #[error("Failed to launch '{}': {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Submission of image {index} was rejected ({status}): {stderr}")]
    Rejected {
        index: usize,
        status: String,
        stderr: String,
    },
}

/// Everything a worker needs to produce any image of one simulation.
#[derive(Debug, Clone)]
pub struct SimulationJob {
    pub simulation: Arc<Simulation>,
    pub store: Arc<ResultStore>,
    /// Persisted metadata, for workers that live in another process.
    pub metadata_path: PathBuf,
}

pub trait TaskDispatcher: Send + Sync {
    /// Schedules image `index` and returns without waiting for it.
    ///
    /// An error means the task could not be handed off at all; failures of the task
    /// itself are never reported here.
    fn submit(&self, job: &SimulationJob, index: usize) -> Result<(), DispatchError>;
}

/// Runs tasks on a dedicated rayon pool inside this process.
pub struct LocalDispatcher {
    pool: rayon::ThreadPool,
    simulator: Arc<dyn ImageSimulator>,
}

impl LocalDispatcher {
    /// `threads == 0` lets rayon choose from the available cores.
    pub fn new(threads: usize, simulator: Arc<dyn ImageSimulator>) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("spsim-worker-{i}"))
            .build()?;
        Ok(Self { pool, simulator })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl TaskDispatcher for LocalDispatcher {
    fn submit(&self, job: &SimulationJob, index: usize) -> Result<(), DispatchError> {
        let simulation = Arc::clone(&job.simulation);
        let store = Arc::clone(&job.store);
        let simulator = Arc::clone(&self.simulator);
        self.pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                simulation.simulate_image(index, Some(store.as_ref()), simulator.as_ref())
            }));
            match outcome {
                Ok(Ok(_)) => debug!(index, "Image simulated"),
                Ok(Err(e)) => warn!(index, error = %e, "Image simulation failed"),
                Err(payload) => {
                    error!(index, panic = panic_message(payload.as_ref()), "Image simulation panicked")
                }
            }
        });
        trace!(index, "Submitted to local pool");
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

/// Resources requested for every cluster job.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResources {
    pub partition: String,
    pub cpus_per_task: u32,
    pub memory: String,
    pub gres: Option<String>,
    pub time_limit: String,
    pub extra_args: Vec<String>,
}

impl Default for ClusterResources {
    fn default() -> Self {
        Self {
            partition: "gpu".to_string(),
            cpus_per_task: 1,
            memory: "32GB".to_string(),
            gres: Some("gpu:1".to_string()),
            time_limit: "00:30:00".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Submits one SLURM batch job per image, each running `spsim worker`.
#[derive(Debug, Clone)]
pub struct SlurmDispatcher {
    sbatch: PathBuf,
    program: PathBuf,
    worker_args: Vec<String>,
    resources: ClusterResources,
}

impl SlurmDispatcher {
    /// Workers re-run the current executable.
    pub fn new(resources: ClusterResources) -> Result<Self, DispatchError> {
        let program = std::env::current_exe().map_err(DispatchError::CurrentExecutable)?;
        Ok(Self::with_program(program, resources))
    }

    pub fn with_program(program: impl Into<PathBuf>, resources: ClusterResources) -> Self {
        Self {
            sbatch: PathBuf::from("sbatch"),
            program: program.into(),
            worker_args: Vec::new(),
            resources,
        }
    }

    /// Extra arguments appended to every `worker` invocation.
    pub fn with_worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    pub fn with_sbatch(mut self, sbatch: impl Into<PathBuf>) -> Self {
        self.sbatch = sbatch.into();
        self
    }

    pub fn resources(&self) -> &ClusterResources {
        &self.resources
    }

    /// Shell command the batch job wraps.
    pub fn worker_command(&self, metadata_path: &Path, index: usize) -> String {
        let mut command = format!(
            "{} worker --metadata {} --index {index}",
            shell_quote(&self.program.to_string_lossy()),
            shell_quote(&metadata_path.to_string_lossy()),
        );
        for arg in &self.worker_args {
            command.push(' ');
            command.push_str(&shell_quote(arg));
        }
        command
    }

    pub fn sbatch_args(&self, metadata_path: &Path, index: usize) -> Vec<String> {
        let r = &self.resources;
        let mut args = vec![
            "--parsable".to_string(),
            format!("--job-name=spsim-{index}"),
            format!("--partition={}", r.partition),
            format!("--cpus-per-task={}", r.cpus_per_task),
            format!("--mem={}", r.memory),
        ];
        if let Some(gres) = &r.gres {
            args.push(format!("--gres={gres}"));
        }
        args.push(format!("--time={}", r.time_limit));
        args.extend(r.extra_args.iter().cloned());
        args.push("--wrap".to_string());
        args.push(self.worker_command(metadata_path, index));
        args
    }
}

impl TaskDispatcher for SlurmDispatcher {
    fn submit(&self, job: &SimulationJob, index: usize) -> Result<(), DispatchError> {
        let output = Command::new(&self.sbatch)
            .args(self.sbatch_args(&job.metadata_path, index))
            .output()
            .map_err(|source| DispatchError::Launch {
                program: self.sbatch.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DispatchError::Rejected {
                index,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout.trim().split(';').next().unwrap_or_default();
        debug!(index, job_id, "Submitted cluster job");
        Ok(())
    }
}

/// Quotes a string for POSIX `sh`.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
