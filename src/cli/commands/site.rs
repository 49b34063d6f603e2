//! Local site configuration

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::args::{SiteVoArgs, is_all_sites};
use crate::config::Config;
use crate::federation::{SiteConfig, SiteDirectory};
use crate::ui::print_set_env_command;

#[derive(Args)]
pub struct SiteCommands {
    #[command(subcommand)]
    pub command: SiteSubcommands,
}

#[derive(Subcommand)]
pub enum SiteSubcommands {
    /// List sites with a local configuration
    List,
    /// Show the configuration of a site, or of every site with ALL_SITES
    Show {
        /// Site name in GOCDB [default: from config]
        #[arg(long, env = "EGI_SITE")]
        site: Option<String>,
    },
    /// Print the auth URL and project ID of a VO on a site
    ShowProjectId {
        #[command(flatten)]
        target: SiteVoArgs,
    },
}

pub async fn site_command(args: SiteCommands, config: &Config) -> Result<i32> {
    let directory = SiteDirectory::load(&config.site_config_dir)?;

    match args.command {
        SiteSubcommands::List => {
            for site in directory.list_sites() {
                println!("{}", site);
            }
            Ok(0)
        }
        SiteSubcommands::Show { site } => {
            let site = site.unwrap_or_else(|| config.site.clone());
            if is_all_sites(&site) {
                for site_config in directory.sites() {
                    println!("{}", render(site_config)?);
                }
                return Ok(0);
            }
            match directory.find(&site) {
                Some(site_config) => {
                    println!("{}", render(site_config)?);
                    Ok(0)
                }
                None => {
                    eprintln!("Site {} not found", site);
                    Ok(1)
                }
            }
        }
        SiteSubcommands::ShowProjectId { target } => {
            let site = target.site(config);
            let vo = target.vo(config);
            match directory.project_for(&site, &vo) {
                Some(binding) => {
                    print_set_env_command("OS_AUTH_URL", &binding.endpoint.auth_url);
                    print_set_env_command("OS_PROJECT_ID", &binding.project_id);
                    Ok(0)
                }
                None => {
                    eprintln!("VO {} not found on site {}", vo, site);
                    Ok(1)
                }
            }
        }
    }
}

fn render(site: &SiteConfig) -> Result<String> {
    serde_yaml::to_string(site).with_context(|| format!("Failed to render site {}", site.gocdb))
}
