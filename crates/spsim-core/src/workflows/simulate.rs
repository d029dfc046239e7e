use crate::engine::config::SimulationConfig;
use crate::engine::dispatch::{SimulationJob, TaskDispatcher};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::simulation::Simulation;
use crate::engine::simulator::ImageSimulator;
use crate::engine::store::{ResultStore, StoreProgress};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// How often [`wait_for_completion`] lists the result store.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Samples all per-image parameters for a validated configuration.
#[instrument(skip_all, name = "prepare_simulation", fields(seed = ?seed))]
pub fn prepare_simulation(
    config: SimulationConfig,
    seed: Option<u64>,
) -> Result<Simulation, EngineError> {
    let simulation = Simulation::from_config(config, seed)?;
    let n_files = simulation.config().structure_files().map_or(0, |f| f.len());
    info!(
        "Prepared {} images from {} structure files.",
        simulation.len(),
        n_files
    );
    Ok(simulation)
}

/// Creates the empty result store, persists metadata and submits one task per image.
///
/// The store is created first so that an existing run is never touched: if anything
/// already exists at the store path, nothing is written and nothing is submitted.
///
/// Returns as soon as every task has been handed to the dispatcher. Tasks are never
/// retried; a failed task only shows up as a chunk that stays uninitialized.
#[instrument(skip_all, name = "execute_simulation", fields(n_images = simulation.len()))]
pub fn execute(
    simulation: Simulation,
    dispatcher: &dyn TaskDispatcher,
    reporter: &ProgressReporter,
) -> Result<SimulationJob, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Submitting" });

    let store = simulation.create_store()?;
    info!("Results will be stored in '{}'.", store.path().display());
    reporter.report(Progress::Message(format!(
        "Results stored in '{}'",
        store.path().display()
    )));

    let metadata_path = simulation.config().metadata_path();
    simulation.write_metadata(&metadata_path)?;
    let metadata_path =
        std::path::absolute(&metadata_path).map_err(|source| EngineError::Metadata {
            path: metadata_path.clone(),
            source,
        })?;
    info!("Simulation parameters stored in '{}'.", metadata_path.display());
    reporter.report(Progress::Message(format!(
        "Simulation parameters stored in '{}'",
        metadata_path.display()
    )));

    let job = SimulationJob {
        simulation: Arc::new(simulation),
        store: Arc::new(store),
        metadata_path,
    };

    let total = job.simulation.len();
    reporter.report(Progress::TaskStart {
        total_steps: total as u64,
    });
    for index in 0..total {
        dispatcher.submit(&job, index)?;
        reporter.report(Progress::TaskAdvance {
            completed: index as u64 + 1,
        });
    }
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    info!("Submitted {} tasks.", total);
    Ok(job)
}

/// Polls the store until every chunk is written or `deadline` has elapsed.
///
/// Safe to interrupt at any point: it only ever reads the directory listing.
#[instrument(skip_all, name = "wait_for_completion")]
pub fn wait_for_completion(
    store: &ResultStore,
    interval: Duration,
    deadline: Option<Duration>,
    reporter: &ProgressReporter,
) -> Result<StoreProgress, EngineError> {
    let start = Instant::now();
    let mut progress = store.progress()?;

    reporter.report(Progress::PhaseStart { name: "Simulating" });
    reporter.report(Progress::TaskStart {
        total_steps: progress.total as u64,
    });

    let mut last_reported = None;
    loop {
        if last_reported != Some(progress.initialized) {
            reporter.report(Progress::TaskAdvance {
                completed: progress.initialized as u64,
            });
            last_reported = Some(progress.initialized);
            debug!(
                initialized = progress.initialized,
                total = progress.total,
                "Progress update"
            );
        }

        if progress.is_complete() {
            break;
        }

        let waited = start.elapsed();
        if let Some(limit) = deadline {
            if waited >= limit {
                return Err(EngineError::Timeout {
                    initialized: progress.initialized,
                    total: progress.total,
                    waited,
                });
            }
        }

        thread::sleep(interval);
        progress = store.progress()?;
    }

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);
    info!(
        "All {} images simulated in {:.1?}.",
        progress.total,
        start.elapsed()
    );
    Ok(progress)
}

/// Simulates a single image of a persisted simulation into its result store.
///
/// This is what each cluster job runs. The store is expected next to the metadata
/// file, where [`execute`] creates it. Already written images are skipped, so a
/// duplicate delivery of the same task is harmless.
#[instrument(skip_all, name = "worker", fields(index = index))]
pub fn run_worker(
    metadata_path: &Path,
    index: usize,
    simulator: &dyn ImageSimulator,
) -> Result<(), EngineError> {
    let simulation = Simulation::read_metadata(metadata_path)?;
    simulation.parameters(index)?;
    let store = ResultStore::open(metadata_path.with_extension("zarr"))?;

    if store.is_initialized(index)? {
        info!("Image {} already simulated, nothing to do.", index);
        return Ok(());
    }

    simulation.simulate_image(index, Some(&store), simulator)?;
    info!("Image {} simulated.", index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::tests::{structure_dir, valid_builder};
    use crate::engine::dispatch::{DispatchError, LocalDispatcher};
    use crate::engine::task::tests::FakeSimulator;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    fn small_config(out: &TempDir, structures: &TempDir, n: usize) -> SimulationConfig {
        valid_builder(structures.path())
            .n_images(n)
            .image_sidelength(8)
            .output_basename(out.path().join("run").to_string_lossy().into_owned())
            .build()
            .unwrap()
    }

    /// Records submissions without running anything.
    #[derive(Default)]
    struct RecordingDispatcher {
        submitted: Mutex<Vec<usize>>,
    }

    impl TaskDispatcher for RecordingDispatcher {
        fn submit(&self, _job: &SimulationJob, index: usize) -> Result<(), DispatchError> {
            self.submitted.lock().unwrap().push(index);
            Ok(())
        }
    }

    #[test]
    fn execute_persists_metadata_and_submits_every_index() {
        let structures = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let simulation = prepare_simulation(small_config(&out, &structures, 5), Some(1)).unwrap();
        let dispatcher = RecordingDispatcher::default();

        let job = execute(simulation, &dispatcher, &ProgressReporter::new()).unwrap();

        assert_eq!(*dispatcher.submitted.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(job.metadata_path.is_absolute());
        assert!(out.path().join("run.json").is_file());
        assert_eq!(job.store.progress().unwrap(), StoreProgress { initialized: 0, total: 5 });
        let reloaded = Simulation::read_metadata(&job.metadata_path).unwrap();
        assert_eq!(reloaded.len(), 5);
    }

    #[test]
    fn execute_announces_where_results_and_metadata_go() {
        let structures = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let simulation = prepare_simulation(small_config(&out, &structures, 2), Some(1)).unwrap();
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e: Progress| events.lock().unwrap().push(e)));

        execute(simulation, &RecordingDispatcher::default(), &reporter).unwrap();
        drop(reporter);

        let messages: Vec<String> = events
            .into_inner()
            .unwrap()
            .into_iter()
            .filter_map(|e| match e {
                Progress::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("run.zarr"));
        assert!(messages[1].contains("run.json"));
    }

    #[test]
    fn execute_refuses_to_overwrite_existing_results() {
        let structures = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let config = small_config(&out, &structures, 2);
        std::fs::create_dir(config.store_path()).unwrap();
        let dispatcher = RecordingDispatcher::default();

        let simulation = prepare_simulation(config, Some(1)).unwrap();
        let result = execute(simulation, &dispatcher, &ProgressReporter::new());

        assert!(matches!(result, Err(EngineError::Store(_))));
        assert!(dispatcher.submitted.lock().unwrap().is_empty());
        assert!(!out.path().join("run.json").exists());
    }

    #[test]
    fn local_simulation_runs_to_completion() {
        let structures = structure_dir(&["a.pdb", "b.pdb"]);
        let out = tempdir().unwrap();
        let simulation = prepare_simulation(small_config(&out, &structures, 10), Some(4)).unwrap();
        let dispatcher = LocalDispatcher::new(2, Arc::new(FakeSimulator::new(3.0))).unwrap();
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e: Progress| events.lock().unwrap().push(e)));

        let job = execute(simulation, &dispatcher, &ProgressReporter::new()).unwrap();
        let progress = wait_for_completion(
            &job.store,
            Duration::from_millis(5),
            Some(Duration::from_secs(60)),
            &reporter,
        )
        .unwrap();
        drop(reporter);

        assert_eq!(progress, StoreProgress { initialized: 10, total: 10 });
        let events = events.into_inner().unwrap();
        assert_eq!(events[0], Progress::PhaseStart { name: "Simulating" });
        assert_eq!(events[1], Progress::TaskStart { total_steps: 10 });
        assert!(events.contains(&Progress::TaskAdvance { completed: 10 }));
        assert_eq!(events.last(), Some(&Progress::PhaseFinish));
    }

    #[test]
    fn waiting_on_a_stalled_store_times_out() {
        let out = tempdir().unwrap();
        let store = ResultStore::create(out.path().join("s.zarr"), [4, 2, 2], [1, 2, 2]).unwrap();

        let result = wait_for_completion(
            &store,
            Duration::from_millis(5),
            Some(Duration::from_millis(30)),
            &ProgressReporter::new(),
        );

        assert!(matches!(
            result,
            Err(EngineError::Timeout {
                initialized: 0,
                total: 4,
                ..
            })
        ));
    }

    #[test]
    fn worker_simulates_from_metadata_and_skips_finished_images() {
        let structures = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let simulation = prepare_simulation(small_config(&out, &structures, 3), Some(2)).unwrap();
        let job = execute(simulation, &RecordingDispatcher::default(), &ProgressReporter::new()).unwrap();
        let simulator = FakeSimulator::new(1.0);

        run_worker(&job.metadata_path, 1, &simulator).unwrap();
        run_worker(&job.metadata_path, 1, &simulator).unwrap();

        assert_eq!(simulator.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(job.store.is_initialized(1).unwrap());
        assert_eq!(job.store.progress().unwrap().initialized, 1);
    }

    #[test]
    fn worker_rejects_out_of_range_index() {
        let structures = structure_dir(&["a.pdb"]);
        let out = tempdir().unwrap();
        let simulation = prepare_simulation(small_config(&out, &structures, 2), Some(2)).unwrap();
        let job = execute(simulation, &RecordingDispatcher::default(), &ProgressReporter::new()).unwrap();

        let result = run_worker(&job.metadata_path, 9, &FakeSimulator::new(1.0));

        assert!(matches!(
            result,
            Err(EngineError::IndexOutOfRange { index: 9, len: 2 })
        ));
    }
}
