//! Command-line interface.

pub mod app;
pub mod args;
pub mod commands;

use anyhow::Result;
use std::path::Path;

pub use app::{Cli, Commands};

use crate::config::Config;

/// Run one command, returning the process exit code.
pub async fn run(command: Commands, config: &Config, config_path: &Path) -> Result<i32> {
    match command {
        Commands::Token(args) => commands::token_command(args, config).await,
        Commands::Endpoint(args) => commands::endpoint_command(args, config).await,
        Commands::Site(args) => commands::site_command(args, config).await,
        Commands::Openstack(args) => commands::openstack_command(args, config).await,
        Commands::OpenstackInt(args) => commands::openstack_int_command(args, config).await,
        Commands::Secret(args) => commands::secret_command(args, config).await,
        Commands::Config(args) => commands::config_command(args, config, config_path).await,
    }
}
