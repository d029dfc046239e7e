use crate::cli::WorkerArgs;
use crate::error::Result;
use spsim::engine::simulator::parakeet::ParakeetSimulator;
use spsim::workflows::simulate;
use tracing::info;

pub async fn run(args: WorkerArgs) -> Result<()> {
    let simulator = match &args.parakeet_bin_dir {
        Some(dir) => ParakeetSimulator::with_bin_dir(dir),
        None => ParakeetSimulator::new(),
    };

    info!(
        "Simulating image {} of '{}'.",
        args.index,
        args.metadata.display()
    );
    tokio::task::block_in_place(|| simulate::run_worker(&args.metadata, args.index, &simulator))?;
    Ok(())
}
