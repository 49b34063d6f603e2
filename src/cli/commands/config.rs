use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommands {
    #[command(subcommand)]
    pub command: ConfigSubcommands,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
}

#[derive(Subcommand)]
pub enum ConfigSubcommands {
    /// Show the effective configuration
    Show {
        #[arg(short, long, value_enum, default_value_t)]
        output_format: ConfigFormat,
    },
    /// Write the effective configuration to a file
    Create {
        /// Destination [default: the config file location]
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn config_command(args: ConfigCommands, config: &Config, config_path: &Path) -> Result<i32> {
    match args.command {
        ConfigSubcommands::Show { output_format } => {
            let rendered = match output_format {
                ConfigFormat::Toml => toml::to_string_pretty(config).context("Failed to serialize config to TOML")?,
                ConfigFormat::Json => serde_json::to_string_pretty(config)?,
            };
            println!("{}", rendered.trim_end());
            Ok(0)
        }
        ConfigSubcommands::Create { path, force } => {
            let path = path.unwrap_or_else(|| config_path.to_path_buf());
            if path.exists() && !force {
                bail!("Config file {} already exists, use --force to overwrite", path.display());
            }
            config.save(&path)?;
            println!("Config saved to {}", path.display());
            Ok(0)
        }
    }
}
