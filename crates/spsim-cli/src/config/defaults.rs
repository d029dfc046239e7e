use crate::cli::ExecutorKind;
use spsim::engine::dispatch::ClusterResources;
use spsim::workflows::simulate::DEFAULT_POLL_INTERVAL;

/// Values used when neither the command line nor the config file sets them.
///
/// Simulation parameters have no defaults: every run states its own.
pub struct DefaultsConfig {
    pub executor: ExecutorKind,
    /// Zero lets the thread pool use every available core.
    pub threads: usize,
    pub poll_interval_ms: u64,
    pub cluster: ClusterResources,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::Local,
            threads: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            cluster: ClusterResources::default(),
        }
    }
}
