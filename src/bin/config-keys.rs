//! Config Keys CLI
//!
//! Command-line interface for normalizing configuration files against an
//! exported descriptor tree.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use config_keys::{
    load_descriptor, load_document, normalize, unknown_keys, FieldDescriptor, LoadOptions, Mapping,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "config-keys")]
#[command(about = "Normalize configuration keys against a field descriptor")]
#[command(version)]
struct Cli {
    /// Log filter (e.g. debug, config_keys=trace); falls back to RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a configuration file and print it as JSON
    Normalize {
        /// Configuration file (.json, .yaml, .yml)
        config: PathBuf,

        /// Descriptor tree (JSON) exported by the application
        #[arg(long, short)]
        descriptor: PathBuf,

        /// Expand ${VAR} and $VAR from the environment before parsing
        #[arg(long)]
        env: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Report keys that match no declared field
    Check {
        /// Configuration file (.json, .yaml, .yml)
        config: PathBuf,

        /// Descriptor tree (JSON) exported by the application
        #[arg(long, short)]
        descriptor: PathBuf,

        /// Expand ${VAR} and $VAR from the environment before parsing
        #[arg(long)]
        env: bool,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Validate a descriptor file and print it
    Descriptor {
        /// Descriptor tree (JSON)
        path: PathBuf,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Normalize {
            config,
            descriptor,
            env,
            output,
            pretty,
        } => run_normalize(&config, &descriptor, env, output, pretty),

        Commands::Check {
            config,
            descriptor,
            env,
            json,
        } => run_check(&config, &descriptor, env, json),

        Commands::Descriptor { path, pretty } => run_descriptor(&path, pretty),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Install a stderr subscriber; `--log-level` wins over `RUST_LOG`.
fn init_logging(level: Option<&str>) {
    let filter = level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_normalize(
    config: &Path,
    descriptor_path: &Path,
    env: bool,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let (raw, descriptor) = load_inputs(config, descriptor_path, env)?;
    let normalized = normalize(&raw, &descriptor);

    let json_output = to_json(&normalized, pretty)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct CheckReport<'a> {
    file: &'a Path,
    unknown: Vec<String>,
}

fn run_check(
    config: &Path,
    descriptor_path: &Path,
    env: bool,
    json_output: bool,
) -> Result<(), u8> {
    let (raw, descriptor) = load_inputs(config, descriptor_path, env)?;
    let unknown = unknown_keys(&raw, &descriptor);
    let passed = unknown.is_empty();

    if json_output {
        let report = CheckReport {
            file: config,
            unknown,
        };
        println!("{}", to_json(&report, false)?);
    } else if passed {
        println!("{}: all keys known", config.display());
    } else {
        eprintln!("{}: {} unknown key(s)", config.display(), unknown.len());
        for key in &unknown {
            eprintln!("  {}", key);
        }
    }

    if passed {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_descriptor(path: &Path, pretty: bool) -> Result<(), u8> {
    let descriptor = load_descriptor(path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    println!("{}", to_json(&descriptor, pretty)?);
    Ok(())
}

fn load_inputs(
    config: &Path,
    descriptor_path: &Path,
    env: bool,
) -> Result<(Mapping, FieldDescriptor), u8> {
    let descriptor = load_descriptor(descriptor_path).map_err(|e| {
        eprintln!("Error loading descriptor: {}", e);
        e.exit_code() as u8
    })?;

    let options = LoadOptions::new().use_env(env);
    let raw = load_document(config, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    Ok((raw, descriptor))
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, u8> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}
