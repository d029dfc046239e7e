use crate::cli::ExecutorKind;
use spsim::engine::config::SimulationConfig;
use spsim::engine::dispatch::ClusterResources;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub executor: ExecutorKind,
    pub threads: usize,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub parakeet_bin_dir: Option<PathBuf>,
    pub wait: bool,
}

#[derive(Debug)]
pub struct AppConfig {
    pub simulation: SimulationConfig,
    pub seed: Option<u64>,
    pub execution: ExecutionConfig,
    pub cluster: ClusterResources,
}
