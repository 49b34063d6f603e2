use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use log::{debug, info};
use std::fs::{self, File};
use std::path::Path;

use fedcloud_cli::cli::{self, Cli};
use fedcloud_cli::config::Config;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), error);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config_path = Config::resolve_path(cli.config_file.as_deref());
    let config = Config::load(Some(config_path.as_path())).context("Failed to load configuration")?;
    init_logging(&config);

    info!("Starting fedcloud {}", env!("CARGO_PKG_VERSION"));
    debug!("Config file: {:?}", config_path);
    cli::run(cli.command, &config, &config_path).await
}

/// Log to the configured file, or to stderr when it cannot be opened.
/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.log_level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    match open_log_file(&config.log_file) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(error) => {
            eprintln!(
                "{} cannot open log file {}: {}",
                "Warning:".yellow(),
                config.log_file.display(),
                error
            );
            builder.target(env_logger::Target::Stderr);
        }
    }
    builder.try_init().ok();
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}
