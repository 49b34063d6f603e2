use super::commands::config::ConfigCommands;
use super::commands::endpoint::EndpointCommands;
use super::commands::openstack::{OpenstackArgs, OpenstackIntArgs};
use super::commands::secret::SecretCommands;
use super::commands::site::SiteCommands;
use super::commands::token::TokenCommands;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fedcloud", version)]
#[command(about = "Run OpenStack commands on EGI FedCloud sites with federated identity")]
pub struct Cli {
    /// Configuration file [default: <config dir>/fedcloud/config.toml]
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect access tokens
    Token(TokenCommands),
    /// Discover endpoints, list projects and get scoped tokens
    Endpoint(EndpointCommands),
    /// Show local site configurations
    Site(SiteCommands),
    /// Run an OpenStack command on one or all sites
    Openstack(OpenstackArgs),
    /// Start an interactive OpenStack client on a site
    OpenstackInt(OpenstackIntArgs),
    /// Manage secrets in the FedCloud Vault
    Secret(SecretCommands),
    /// Show or create the configuration file
    Config(ConfigCommands),
}
