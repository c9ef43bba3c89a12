//! Chargeflow command line
//!
//! Runs one service operation against a storage root and prints the result
//! as JSON on stdout. Logs go to stderr.
//!
//! ```text
//! chargeflow upload a.sdf b.pdb
//! chargeflow setup <hash> <hash>
//! chargeflow calculate <computation> --config eem --config qeq:default
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chargeflow::adapters::ProcessEngine;
use chargeflow::{AppConfig, CalculationConfig, ChargeService, ComputationId, ContentHash, OwnerScope, ReadOptions, UploadFile};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Chargeflow - cached partial atomic charge calculations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CHARGEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Storage root, overrides the configuration file
    #[arg(long, env = "CHARGEFLOW_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Charge engine executable
    #[arg(long, env = "CHARGEFLOW_ENGINE", default_value = "chargefw2")]
    engine_bin: PathBuf,

    /// Act as this user; without it the guest pool is used
    #[arg(long, env = "CHARGEFLOW_USER")]
    user: Option<String>,

    /// Worker threads for engine calls, overrides the configuration file
    #[arg(long, env = "CHARGEFLOW_WORKERS")]
    workers: Option<usize>,

    /// Engine calls admitted at once, overrides the configuration file
    #[arg(long, env = "CHARGEFLOW_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store molecule files
    Upload { files: Vec<PathBuf> },
    /// List stored files, oldest first
    Files,
    /// Delete a stored file
    DeleteFile { hash: String },
    /// Create a computation over stored files
    Setup {
        hashes: Vec<String>,
        /// Skip HETATM records
        #[arg(long)]
        no_hetatm: bool,
        /// Discard water molecules
        #[arg(long)]
        ignore_water: bool,
        /// Require exact atom and bond types
        #[arg(long)]
        strict_types: bool,
    },
    /// Methods suitable for every file of a computation
    Suitable { computation: String },
    /// Calculate charges; configs are `method` or `method:parameters`
    Calculate {
        computation: String,
        #[arg(long = "config", value_parser = parse_config)]
        configs: Vec<CalculationConfig>,
    },
    /// Results calculated so far
    Results { computation: String },
    /// Storage usage of the current scope
    Quota,
    /// Delete a computation
    Delete { computation: String },
    /// Methods the engine knows
    Methods,
    /// Parameter sets of a method
    Parameters { method: String },
}

fn parse_config(value: &str) -> std::result::Result<CalculationConfig, String> {
    match value.split_once(':') {
        Some((method, _)) if method.is_empty() => Err(format!("missing method in '{}'", value)),
        Some((method, parameters)) => Ok(CalculationConfig::with_parameters(method, parameters)),
        None if value.is_empty() => Err("empty config".into()),
        None => Ok(CalculationConfig::parameterless(value)),
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    let scope = match &args.user {
        Some(user) => OwnerScope::user(user.as_str())?,
        None => OwnerScope::Guest,
    };
    info!(root = %config.storage.root.display(), scope = %scope, engine = %args.engine_bin.display(), "Starting chargeflow");

    let engine = Arc::new(ProcessEngine::new(&args.engine_bin).with_scratch_dir(config.storage.root.join("tmp")));
    let service = ChargeService::open(config, engine).context("failed to open storage")?;

    match args.command {
        Command::Upload { files } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in files {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                uploads.push(UploadFile::new(name, Bytes::from(bytes)));
            }
            print_json(&service.upload(&scope, uploads).await?)?;
        }
        Command::Files => print_json(&service.list_files(&scope).await?)?,
        Command::DeleteFile { hash } => {
            print_json(&service.delete_file(&scope, &ContentHash::parse(&hash)?).await?)?
        }
        Command::Setup {
            hashes,
            no_hetatm,
            ignore_water,
            strict_types,
        } => {
            let hashes = hashes
                .iter()
                .map(|h| ContentHash::parse(h))
                .collect::<chargeflow::Result<Vec<_>>>()?;
            let options = ReadOptions {
                read_hetatm: !no_hetatm,
                ignore_water,
                permissive_types: !strict_types,
            };
            let id = service.setup(&scope, hashes, options).await?;
            print_json(&serde_json::json!({ "computation_id": id }))?;
        }
        Command::Suitable { computation } => {
            let id = ComputationId::parse(&computation)?;
            print_json(&service.suitable_methods(&scope, &id).await?)?;
        }
        Command::Calculate { computation, configs } => {
            let id = ComputationId::parse(&computation)?;
            let results = service.calculate(&scope, &id, configs).await?;
            debug!(metrics = ?service.metrics(), "Calculation finished");
            print_json(&results)?;
        }
        Command::Results { computation } => {
            let id = ComputationId::parse(&computation)?;
            print_json(&service.results(&scope, &id).await?)?;
        }
        Command::Quota => print_json(&service.quota(&scope).await?)?,
        Command::Delete { computation } => {
            let id = ComputationId::parse(&computation)?;
            service.delete_computation(&scope, &id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        Command::Methods => print_json(&service.available_methods().await?)?,
        Command::Parameters { method } => print_json(&service.available_parameters(&method).await?)?,
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(root) = &args.storage_root {
        config.storage.root = root.clone();
    }
    if let Some(workers) = args.workers {
        config.executor.worker_threads = workers;
    }
    if let Some(max_concurrent) = args.max_concurrent {
        config.executor.max_concurrent_calculations = max_concurrent;
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
