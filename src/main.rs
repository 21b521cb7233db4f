//! Granule batch pipeline CLI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use granule_runner::{build_runtime, run_batch, BatchRequest, Config};

#[derive(Parser)]
#[command(name = "granule-runner")]
#[command(about = "Process sensor data granules through the external engine", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Work directory which all activity will occur in
    #[arg(short = 'W', long, default_value = ".", global = true)]
    work_dir: PathBuf,

    /// Directory where final products are published from (defaults to the
    /// work directory)
    #[arg(short = 'O', long, global = true)]
    out_dir: Option<PathBuf>,

    /// Opaque signal token forwarded to the notification collaborator
    #[arg(short = 'S', long, default_value = "", global = true)]
    signal: String,

    /// Each occurrence increases verbosity one level through
    /// ERROR-WARNING-INFO-DEBUG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch over the given input files (default if no command
    /// specified)
    Run {
        /// Input archive file(s) to process
        filenames: Vec<PathBuf>,
    },

    /// List processing candidates without invoking the engine
    Analyze,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let work_dir = cli.work_dir.clone();
    let out_dir = cli.out_dir.clone().unwrap_or_else(|| work_dir.clone());

    let code = match cli.command {
        // Invoking without inputs is an invalid invocation.
        None => {
            eprintln!("No input files given; nothing to process");
            9
        }

        Some(Commands::Run { filenames }) => {
            if filenames.is_empty() {
                eprintln!("No input files given; nothing to process");
                9
            } else {
                run_command(cli.config, work_dir, out_dir, cli.signal, filenames)
            }
        }

        Some(Commands::Analyze) => analyze_command(cli.config, work_dir),

        Some(Commands::Validate) => validate_command(cli.config),

        Some(Commands::GenerateConfig { output }) => generate_config_command(output),
    };

    ExitCode::from(code)
}

fn run_command(
    config_path: PathBuf,
    work_dir: PathBuf,
    out_dir: PathBuf,
    signal: String,
    inputs: Vec<PathBuf>,
) -> u8 {
    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration {}: {:#}", config_path.display(), e);
            return 5;
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {:#}", e);
        return 5;
    }

    check_environment(&config);

    let runtime = match build_runtime(config.processing.worker_threads) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build runtime: {:#}", e);
            return 5;
        }
    };

    let request = BatchRequest {
        work_dir,
        out_dir,
        signal,
        inputs,
    };

    match runtime.block_on(run_batch(config, request)) {
        Ok(stats) => {
            println!("{}", stats);
            stats.exit_code() as u8
        }
        Err(e) => {
            tracing::error!("Batch aborted: {:#}", e);
            5
        }
    }
}

/// Warn about missing site identity in the environment. Advisory only.
fn check_environment(config: &Config) {
    if std::env::var_os("GRANULE_SITE_ID").is_none() {
        tracing::warn!("GRANULE_SITE_ID should be set in the environment");
    }
    if std::env::var_os("GRANULE_DOMAIN").is_none() {
        tracing::warn!("GRANULE_DOMAIN should be set in the environment");
    }
    if !config.engine.executable.exists() {
        tracing::warn!(
            "Engine executable {} not found; invocations are unlikely to run",
            config.engine.executable.display()
        );
    }
    if let Some(unpacker) = &config.engine.unpacker {
        if !unpacker.exists() {
            tracing::warn!(
                "Unpacker {} not found; inputs are unlikely to unpack",
                unpacker.display()
            );
        }
    }
}

fn analyze_command(config_path: PathBuf, work_dir: PathBuf) -> u8 {
    use granule_runner::ancillary::NoopRetriever;
    use granule_runner::catalog::FsCatalog;
    use granule_runner::notify::NullNotifier;
    use granule_runner::products::NoopGeoRef;
    use granule_runner::{Metrics, Orchestrator, ProductTable};
    use std::sync::Arc;

    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration {}: {:#}", config_path.display(), e);
            return 5;
        }
    };

    let orchestrator = Orchestrator::new(
        Arc::new(config),
        Arc::new(FsCatalog::new(&work_dir)),
        Arc::new(NoopRetriever),
        Arc::new(NoopGeoRef),
        Arc::new(NullNotifier),
        ProductTable::builtin(),
        Metrics::new(),
    );

    match orchestrator.plan() {
        Ok(plan) => {
            println!("=== Processing candidates ===");
            for entry in &plan {
                println!(
                    "group {}: {} @ {} [{}]",
                    entry.group,
                    entry.granule.granule_id,
                    entry.granule.start_time,
                    if entry.covered { "covered" } else { "no coverage" }
                );
            }
            println!("{} candidates", plan.len());
            0
        }
        Err(e) => {
            tracing::error!("Analysis failed: {:#}", e);
            5
        }
    }
}

fn validate_command(config_path: PathBuf) -> u8 {
    let config = match Config::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            return 5;
        }
    };
    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid");
            0
        }
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            5
        }
    }
}

fn generate_config_command(output: PathBuf) -> u8 {
    // Generate a commented YAML config
    let yaml = r#"# Granule batch pipeline configuration

# === ENGINE: the external processing engine ===
engine:
  # Engine executable, invoked once per eligible granule with the task
  # descriptor path as its sole argument
  executable: /opt/engine/bin/controller

  # Archive unpacker run once per supplied input before grouping.
  # Comment out if inputs arrive already unpacked.
  unpacker: /opt/engine/tools/bin/unpacker

  # Fixed timing template values
  scans_per_granule: 48
  domain: OPS

# === COLLECTIONS: input record types and contiguity policy ===
collections:
  science: SENSOR-SCIENCE-RDR
  reference_track: PLATFORM-DIARY-RDR

  # Maximum end-to-start gap in seconds for two granules to be contiguous
  max_gap_secs: 600

# === ANCILLARY: reference data search and staging ===
ancillary:
  # Local cache root, searched before the repository roots
  cache_root: /var/cache/ancillary

  # Shared repository roots, searched in order
  repository_roots:
    - /opt/engine/data/repositories/cache

  # Per-run subdirectory the resolved files are linked into
  subdir: linked_data

  # Command fetching one dynamic category; prints staged paths line by line
  # fetch_command: /opt/engine/tools/bin/fetch-ancillary

# === PRODUCTS: output verification ===
products:
  # Site tag embedded in produced file names
  site_tag: ops

  # JSON table overriding the built-in product expectations
  # table_path: /etc/granule-runner/products.json

  # Command writing the geolocation reference property into one file
  # geo_ref_command: /opt/engine/tools/bin/write-geo-ref

# === PROCESSING: performance and reporting ===
processing:
  # Max concurrent dynamic ancillary fetches
  fetch_concurrency: 4

  # Tokio worker threads (null = num CPUs)
  # worker_threads: 8

  # Print a metrics summary after the batch completes
  enable_metrics: true

  # Save the metrics snapshot JSON after a run
  # metrics_output_path: metrics.json

# === NOTIFICATION: downstream announcement hook ===
notification:
  # Command run once per granule; payload arrives via WORK_DIR, OUT_DIR,
  # SIGNAL, GRANULE_ID, and PRODUCT_TIMES environment variables
  # hook_command: /usr/local/bin/announce-products
"#;

    match std::fs::write(&output, yaml) {
        Ok(()) => {
            println!("Generated sample configuration at: {}", output.display());
            0
        }
        Err(e) => {
            eprintln!("Failed to write {}: {}", output.display(), e);
            5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - treated as a run with no inputs
        let cli = Cli::try_parse_from(["granule-runner"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_run_with_inputs() {
        let cli = Cli::try_parse_from([
            "granule-runner",
            "-W",
            "/data/work",
            "run",
            "a.h5",
            "b.h5",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Run { filenames }) => assert_eq!(filenames.len(), 2),
            _ => panic!("expected run command"),
        }
        assert_eq!(cli.work_dir, PathBuf::from("/data/work"));
    }

    #[test]
    fn test_cli_parse_analyze() {
        let cli = Cli::try_parse_from(["granule-runner", "analyze", "-c", "other.yaml"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_verbosity_count() {
        let cli = Cli::try_parse_from(["granule-runner", "-vvv", "validate"]).unwrap();
        assert_eq!(cli.verbose, 3);
    }
}
