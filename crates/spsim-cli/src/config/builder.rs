use super::defaults::DefaultsConfig;
use super::file::FileConfig;
use super::models::{AppConfig, ExecutionConfig};
use crate::cli::{ExecutorKind, RunArgs};
use crate::error::{CliError, Result};
use clap::ValueEnum;
use spsim::engine::config::SimulationConfig;
use spsim::engine::dispatch::ClusterResources;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Merges command line arguments, the optional config file and built-in defaults,
/// in that order of precedence. `-S` values override the file but not explicit flags.
pub fn build_config(args: &RunArgs, threads: Option<usize>) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();

    let file_config = if let Some(config_path) = &args.config {
        FileConfig::from_file(config_path)?
    } else {
        FileConfig::default()
    };

    let mut file_config = apply_set_values(file_config, &args.set_values)?;

    let sim_file = file_config.simulation.take().unwrap_or_default();
    let input_directory = required(
        args.input_directory.clone().or(sim_file.input_directory),
        "--input-directory",
        "simulation.input-directory",
    )?;
    let output_basename = required(
        args.output_basename.clone().or(sim_file.output_basename),
        "--output-basename",
        "simulation.output-basename",
    )?;
    let n_images = required(
        args.n_images.or(sim_file.n_images),
        "--n-images",
        "simulation.n-images",
    )?;
    let image_sidelength = required(
        args.image_sidelength.or(sim_file.image_sidelength),
        "--image-sidelength",
        "simulation.image-sidelength",
    )?;
    let min_defocus = required(
        args.min_defocus.or(sim_file.min_defocus),
        "--min-defocus",
        "simulation.min-defocus",
    )?;
    let max_defocus = required(
        args.max_defocus.or(sim_file.max_defocus),
        "--max-defocus",
        "simulation.max-defocus",
    )?;

    let simulation = SimulationConfig::builder()
        .input_directory(input_directory)
        .output_basename(output_basename)
        .n_images(n_images)
        .image_sidelength(image_sidelength)
        .defocus_range(min_defocus, max_defocus)
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let exec_file = file_config.execution.take().unwrap_or_default();
    let poll_interval_ms = args
        .poll_interval_ms
        .or(exec_file.poll_interval_ms)
        .unwrap_or(defaults.poll_interval_ms);
    if poll_interval_ms == 0 {
        return Err(CliError::Config(
            "`execution.poll-interval-ms` must be positive.".to_string(),
        ));
    }
    let execution = ExecutionConfig {
        executor: args
            .executor
            .or(exec_file.executor)
            .unwrap_or(defaults.executor),
        threads: threads.or(exec_file.threads).unwrap_or(defaults.threads),
        poll_interval: Duration::from_millis(poll_interval_ms),
        timeout: args
            .timeout
            .or(exec_file.timeout)
            .map(Duration::from_secs),
        parakeet_bin_dir: args
            .parakeet_bin_dir
            .clone()
            .or(exec_file.parakeet_bin_dir),
        wait: !args.no_wait,
    };
    if !execution.wait && execution.executor == ExecutorKind::Local {
        return Err(CliError::Argument(
            "--no-wait requires the slurm executor; local tasks stop when spsim exits."
                .to_string(),
        ));
    }

    let cluster_file = file_config.cluster.take().unwrap_or_default();
    let cluster_defaults = defaults.cluster;
    let cluster = ClusterResources {
        partition: args
            .partition
            .clone()
            .or(cluster_file.partition)
            .unwrap_or(cluster_defaults.partition),
        cpus_per_task: cluster_file
            .cpus_per_task
            .unwrap_or(cluster_defaults.cpus_per_task),
        memory: cluster_file.memory.unwrap_or(cluster_defaults.memory),
        gres: match cluster_file.gres {
            Some(gres) if gres.is_empty() => None,
            Some(gres) => Some(gres),
            None => cluster_defaults.gres,
        },
        time_limit: cluster_file
            .time_limit
            .unwrap_or(cluster_defaults.time_limit),
        extra_args: cluster_file
            .extra_args
            .unwrap_or(cluster_defaults.extra_args),
    };

    let seed = args.seed.or(sim_file.seed);

    Ok(AppConfig {
        simulation,
        seed,
        execution,
        cluster,
    })
}

fn required<T>(value: Option<T>, flag: &str, key: &str) -> Result<T> {
    value.ok_or_else(|| {
        CliError::Config(format!(
            "A value for '{}' is required either via {} or in the config file.",
            key, flag
        ))
    })
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        match key {
            "simulation.input-directory" => {
                config
                    .simulation
                    .get_or_insert_with(Default::default)
                    .input_directory = Some(PathBuf::from(value_str));
            }
            "simulation.output-basename" => {
                config
                    .simulation
                    .get_or_insert_with(Default::default)
                    .output_basename = Some(value_str.to_string());
            }
            "simulation.n-images" => {
                config.simulation.get_or_insert_with(Default::default).n_images =
                    Some(parse_value(key, value_str)?);
            }
            "simulation.image-sidelength" => {
                config
                    .simulation
                    .get_or_insert_with(Default::default)
                    .image_sidelength = Some(parse_value(key, value_str)?);
            }
            "simulation.min-defocus" => {
                config
                    .simulation
                    .get_or_insert_with(Default::default)
                    .min_defocus = Some(parse_value(key, value_str)?);
            }
            "simulation.max-defocus" => {
                config
                    .simulation
                    .get_or_insert_with(Default::default)
                    .max_defocus = Some(parse_value(key, value_str)?);
            }
            "simulation.seed" => {
                config.simulation.get_or_insert_with(Default::default).seed =
                    Some(parse_value(key, value_str)?);
            }
            "execution.executor" => {
                let executor = <ExecutorKind as ValueEnum>::from_str(value_str, true)
                    .map_err(|_| {
                        CliError::Config(format!("Invalid value for {}: {}", key, value_str))
                    })?;
                config.execution.get_or_insert_with(Default::default).executor = Some(executor);
            }
            "execution.threads" => {
                config.execution.get_or_insert_with(Default::default).threads =
                    Some(parse_value(key, value_str)?);
            }
            "execution.poll-interval-ms" => {
                config
                    .execution
                    .get_or_insert_with(Default::default)
                    .poll_interval_ms = Some(parse_value(key, value_str)?);
            }
            "execution.timeout" => {
                config.execution.get_or_insert_with(Default::default).timeout =
                    Some(parse_value(key, value_str)?);
            }
            "execution.parakeet-bin-dir" => {
                config
                    .execution
                    .get_or_insert_with(Default::default)
                    .parakeet_bin_dir = Some(PathBuf::from(value_str));
            }
            "cluster.partition" => {
                config.cluster.get_or_insert_with(Default::default).partition =
                    Some(value_str.to_string());
            }
            "cluster.cpus-per-task" => {
                config
                    .cluster
                    .get_or_insert_with(Default::default)
                    .cpus_per_task = Some(parse_value(key, value_str)?);
            }
            "cluster.memory" => {
                config.cluster.get_or_insert_with(Default::default).memory =
                    Some(value_str.to_string());
            }
            "cluster.gres" => {
                config.cluster.get_or_insert_with(Default::default).gres =
                    Some(value_str.to_string());
            }
            "cluster.time-limit" => {
                config.cluster.get_or_insert_with(Default::default).time_limit =
                    Some(value_str.to_string());
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}
