use crate::cli::{ExecutorKind, RunArgs};
use crate::config::{AppConfig, build_config};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use spsim::engine::dispatch::{LocalDispatcher, SlurmDispatcher, TaskDispatcher};
use spsim::engine::error::EngineError;
use spsim::engine::progress::ProgressReporter;
use spsim::engine::simulator::parakeet::ParakeetSimulator;
use spsim::workflows::simulate;
use std::sync::Arc;
use tokio::task::block_in_place;
use tracing::{info, warn};

pub async fn run(args: RunArgs, threads: Option<usize>) -> Result<()> {
    info!("Merging configuration from file and CLI arguments...");
    let config = build_config(&args, threads)?;

    let dispatcher = build_dispatcher(&config)?;

    let n_files = config
        .simulation
        .structure_files()
        .map_or(0, |files| files.len());
    let n_images = config.simulation.n_images();
    let simulation =
        block_in_place(|| simulate::prepare_simulation(config.simulation, config.seed))?;

    println!(
        "Simulating {} images from {} structure files with the {} executor.",
        n_images,
        n_files,
        match config.execution.executor {
            ExecutorKind::Local => "local",
            ExecutorKind::Slurm => "slurm",
        }
    );
    if config.execution.executor == ExecutorKind::Local {
        println!("Killing this process will terminate your simulation.");
    }

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    let job = block_in_place(|| simulate::execute(simulation, dispatcher.as_ref(), &reporter))?;

    if !config.execution.wait {
        println!(
            "Not waiting for completion. Check progress with `spsim status {}`.",
            job.store.path().display()
        );
        return Ok(());
    }

    let waited = block_in_place(|| {
        simulate::wait_for_completion(
            &job.store,
            config.execution.poll_interval,
            config.execution.timeout,
            &reporter,
        )
    });

    match waited {
        Ok(progress) => {
            println!("Done! {} images simulated.", progress.total);
            Ok(())
        }
        Err(e @ EngineError::Timeout { .. }) => {
            warn!("Stopped waiting before all images were simulated.");
            println!(
                "Submitted tasks keep running. Check progress with `spsim status {}`.",
                job.store.path().display()
            );
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn build_dispatcher(config: &AppConfig) -> Result<Box<dyn TaskDispatcher>> {
    let bin_dir = config.execution.parakeet_bin_dir.as_ref();
    let dispatcher: Box<dyn TaskDispatcher> = match config.execution.executor {
        ExecutorKind::Local => {
            let simulator = match bin_dir {
                Some(dir) => ParakeetSimulator::with_bin_dir(dir),
                None => ParakeetSimulator::new(),
            };
            let local = LocalDispatcher::new(config.execution.threads, Arc::new(simulator))
                .map_err(EngineError::from)?;
            info!("Running tasks locally on {} threads.", local.threads());
            Box::new(local)
        }
        ExecutorKind::Slurm => {
            let worker_args = bin_dir
                .map(|dir| {
                    vec![
                        "--parakeet-bin-dir".to_string(),
                        dir.to_string_lossy().into_owned(),
                    ]
                })
                .unwrap_or_default();
            let slurm = SlurmDispatcher::new(config.cluster.clone())
                .map_err(EngineError::from)?
                .with_worker_args(worker_args);
            info!(
                "Submitting one SLURM job per image to partition '{}'.",
                slurm.resources().partition
            );
            Box::new(slurm)
        }
    };
    Ok(dispatcher)
}
