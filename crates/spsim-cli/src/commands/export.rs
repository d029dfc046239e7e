use crate::cli::{ExportArgs, ExportCommands};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use spsim::engine::progress::{Progress, ProgressReporter};
use spsim::workflows::export;
use std::path::Path;
use tokio::task::block_in_place;
use tracing::info;

pub async fn run(args: ExportArgs) -> Result<()> {
    match args.command {
        ExportCommands::Mrcs { input, output } => {
            let output = output.unwrap_or_else(|| input.with_extension("mrcs"));
            export_mrcs(&input, &output)
        }
        ExportCommands::Star { input, output } => {
            let output = output.unwrap_or_else(|| input.with_extension("star"));
            info!("Converting '{}' to STAR.", input.display());
            let n = block_in_place(|| export::metadata_to_star(&input, &output))?;
            println!("Wrote {} particles to '{}'.", n, output.display());
            Ok(())
        }
    }
}

fn export_mrcs(input: &Path, output: &Path) -> Result<()> {
    info!("Converting '{}' to an MRC stack.", input.display());
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    reporter.report(Progress::PhaseStart { name: "Exporting" });
    let exported = block_in_place(|| export::store_to_mrcs(input, output, &reporter))?;
    reporter.report(Progress::PhaseFinish);

    println!(
        "Wrote {} images to '{}'.",
        exported.written,
        output.display()
    );
    if exported.missing > 0 {
        println!(
            "Warning: {} images were not simulated yet and are blank.",
            exported.missing
        );
    }
    Ok(())
}
