use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Alister Burt",
    version,
    about = "spsim CLI - Reproducible batch simulation of cryo-EM single-particle images with parakeet.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of images simulated concurrently by the local executor.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sample parameters, dispatch one simulation per image and wait for the results.
    Run(RunArgs),
    /// Simulate a single image of a persisted simulation (used by cluster jobs).
    Worker(WorkerArgs),
    /// Report how many images of a simulation have been written.
    Status(StatusArgs),
    /// Convert simulation results into formats used by downstream tools.
    Export(ExportArgs),
}

/// Where image tasks are executed.
#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// A thread pool inside this process.
    Local,
    /// One SLURM batch job per image.
    Slurm,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    // --- Simulation ---
    /// Directory searched recursively for `.pdb` and `.cif` structures.
    #[arg(short, long, value_name = "DIR")]
    pub input_directory: Option<PathBuf>,

    /// Prefix of the result store (`.zarr`) and metadata (`.json`).
    #[arg(short, long, value_name = "BASENAME")]
    pub output_basename: Option<String>,

    /// Number of images to simulate.
    #[arg(short, long, value_name = "INT")]
    pub n_images: Option<usize>,

    /// Side length of each square image in pixels. Must be even.
    #[arg(short = 's', long, value_name = "INT")]
    pub image_sidelength: Option<usize>,

    /// Lower bound of the defocus range in microns.
    #[arg(long, value_name = "FLOAT")]
    pub min_defocus: Option<f64>,

    /// Upper bound of the defocus range in microns.
    #[arg(long, value_name = "FLOAT")]
    pub max_defocus: Option<f64>,

    /// Seed for parameter sampling. Omit for a fresh random run.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Execution ---
    /// Where to run image tasks.
    #[arg(short = 'e', long, value_enum, value_name = "KIND")]
    pub executor: Option<ExecutorKind>,

    /// Directory holding the parakeet executables, if they are not on PATH.
    #[arg(long, value_name = "DIR")]
    pub parakeet_bin_dir: Option<PathBuf>,

    /// How often the result store is checked for progress, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Stop waiting after this many seconds. Submitted tasks keep running.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Return right after submission instead of waiting for the images.
    #[arg(long)]
    pub no_wait: bool,

    // --- Cluster ---
    /// SLURM partition for worker jobs.
    #[arg(long, value_name = "NAME")]
    pub partition: Option<String>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S cluster.memory=64GB
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `worker` subcommand.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Metadata file written by `spsim run`.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub metadata: PathBuf,

    /// Index of the image to simulate.
    #[arg(short, long, required = true, value_name = "INT")]
    pub index: usize,

    /// Directory holding the parakeet executables, if they are not on PATH.
    #[arg(long, value_name = "DIR")]
    pub parakeet_bin_dir: Option<PathBuf>,
}

/// Arguments for the `status` subcommand.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Result store, or the output basename it was created with.
    #[arg(required = true, value_name = "STORE")]
    pub store: PathBuf,
}

/// Arguments for the `export` subcommand.
#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(subcommand)]
    pub command: ExportCommands,
}

#[derive(Subcommand, Debug)]
pub enum ExportCommands {
    /// Write the result store as an MRC image stack.
    Mrcs {
        /// Result store to read.
        #[arg(short, long, required = true, value_name = "PATH")]
        input: PathBuf,
        /// Stack to write. Defaults to the store path with an `.mrcs` extension.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Write a RELION STAR file describing every particle of a simulation.
    Star {
        /// Metadata file written by `spsim run`.
        #[arg(short, long, required = true, value_name = "PATH")]
        input: PathBuf,
        /// STAR file to write. Defaults to the metadata path with a `.star` extension.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::parse_from([
            "spsim", "-vv", "run", "-i", "structures", "-o", "out/run", "-n", "10", "-s",
            "256", "--min-defocus", "0.5", "--max-defocus", "4", "--seed", "7", "-e",
            "slurm", "-S", "cluster.memory=64GB",
        ]);

        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("Expected 'run' subcommand");
        };
        assert_eq!(args.input_directory, Some(PathBuf::from("structures")));
        assert_eq!(args.output_basename.as_deref(), Some("out/run"));
        assert_eq!(args.n_images, Some(10));
        assert_eq!(args.image_sidelength, Some(256));
        assert_eq!(args.min_defocus, Some(0.5));
        assert_eq!(args.max_defocus, Some(4.0));
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.executor, Some(ExecutorKind::Slurm));
        assert_eq!(args.set_values, vec!["cluster.memory=64GB"]);
    }

    #[test]
    fn worker_requires_metadata_and_index() {
        assert!(Cli::try_parse_from(["spsim", "worker", "--index", "1"]).is_err());

        let cli = Cli::parse_from(["spsim", "worker", "--metadata", "run.json", "--index", "3"]);
        let Commands::Worker(args) = cli.command else {
            panic!("Expected 'worker' subcommand");
        };
        assert_eq!(args.metadata, PathBuf::from("run.json"));
        assert_eq!(args.index, 3);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["spsim", "-q", "-v", "status", "run.zarr"]).is_err());
    }
}
