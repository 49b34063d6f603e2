//! Endpoint discovery, project listing and scoped tokens

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Subcommand};
use colored::*;
use std::sync::Arc;

use crate::cli::args::{OidcArgs, SiteFilterArgs, is_all_sites};
use crate::config::Config;
use crate::dispatch::{SiteDispatcher, SiteOutcome};
use crate::federation::{
    EndpointCatalog, EndpointQuery, FederationExchange, ProjectListing, SiteDirectory, SiteEndpoint,
};
use crate::ui::{self, print_comment, print_set_env_command};

#[derive(Args)]
pub struct EndpointCommands {
    #[command(subcommand)]
    pub command: EndpointSubcommands,
}

#[derive(Subcommand)]
pub enum EndpointSubcommands {
    /// List endpoints in site(s), querying GOCDB
    List {
        #[command(flatten)]
        sites: SiteFilterArgs,
        /// Service type in GOCDB [default: from config]
        #[arg(long)]
        service_type: Option<String>,
        /// Include endpoints not in production
        #[arg(long)]
        not_production: bool,
        /// Include endpoints not monitored
        #[arg(long)]
        not_monitored: bool,
    },
    /// List projects accessible at site(s)
    Projects {
        #[command(flatten)]
        sites: SiteFilterArgs,
        #[command(flatten)]
        oidc: OidcArgs,
        /// Print the result as JSON
        #[arg(short, long)]
        json_output: bool,
    },
    /// Get a scoped Keystone token for a site and project
    Token {
        #[command(flatten)]
        target: ProjectTarget,
        #[command(flatten)]
        oidc: OidcArgs,
    },
    /// Print OS_* environment variables for a site and project
    Env {
        #[command(flatten)]
        target: ProjectTarget,
        #[command(flatten)]
        oidc: OidcArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ProjectTarget {
    /// Site name in GOCDB [default: from config]
    #[arg(long, env = "EGI_SITE")]
    pub site: Option<String>,
    /// Project ID
    #[arg(long, env = "OS_PROJECT_ID")]
    pub project_id: String,
}

pub async fn endpoint_command(args: EndpointCommands, config: &Config) -> Result<i32> {
    match args.command {
        EndpointSubcommands::List {
            sites,
            service_type,
            not_production,
            not_monitored,
        } => {
            let mut query = EndpointQuery::new(service_type.unwrap_or_else(|| config.gocdb_service_type.clone()));
            if let Some(site) = sites.site(config) {
                query = query.site(site);
            }
            if not_production {
                query = query.include_non_production();
            }
            if not_monitored {
                query = query.include_unmonitored();
            }
            list_command(&query, config).await
        }
        EndpointSubcommands::Projects {
            sites,
            oidc,
            json_output,
        } => projects_command(sites.site(config), &oidc, json_output, config).await,
        EndpointSubcommands::Token { target, oidc } => token_command(&target, &oidc, config).await,
        EndpointSubcommands::Env { target, oidc } => env_command(&target, &oidc, config).await,
    }
}

fn catalog(config: &Config) -> Result<EndpointCatalog> {
    let directory = SiteDirectory::load(&config.site_config_dir)?;
    Ok(EndpointCatalog::new(config)
        .context("Failed to create HTTP client")?
        .with_protocols(directory.protocols()))
}

async fn list_command(query: &EndpointQuery, config: &Config) -> Result<i32> {
    let endpoints = catalog(config)?
        .find_endpoints(query)
        .await
        .context("Failed to query GOCDB")?;
    let rows: Vec<Vec<String>> = endpoints
        .into_iter()
        .map(|ep| vec![ep.site, ep.service_type, ep.auth_url])
        .collect();
    ui::table::print(&["Site", "type", "URL"], &rows);
    Ok(0)
}

async fn projects_command(site: Option<String>, oidc: &OidcArgs, json_output: bool, config: &Config) -> Result<i32> {
    let resolved = oidc.resolve(config).await?;

    let mut query = EndpointQuery::new(config.gocdb_service_type.clone());
    if let Some(site) = &site {
        query = query.site(site.clone());
    }
    let endpoints = catalog(config)?
        .find_endpoints(&query)
        .await
        .context("Failed to query GOCDB")?;

    let exchange = FederationExchange::new(config).context("Failed to create HTTP client")?;
    let listing = Arc::new(ProjectListing::new(exchange, resolved.credential, endpoints));
    let sites = match &site {
        Some(site) => vec![site.clone()],
        None => listing.sites(),
    };

    let report = SiteDispatcher::from_config(config).dispatch(&sites, listing).await;

    let mut rows = Vec::new();
    for site_report in report.visible(site.is_none()) {
        match &site_report.outcome {
            SiteOutcome::Succeeded { result } => {
                for project in result {
                    rows.push((project.clone(), site_report.site.clone()));
                }
            }
            _ => {
                if let Some(message) = site_report.outcome.error_message() {
                    eprintln!("{} {}: {}", "Warning:".yellow(), site_report.site, message);
                }
            }
        }
    }

    if rows.is_empty() {
        let target = site.as_deref().unwrap_or("any site");
        eprintln!("Error: You probably do not have access to any project at {}", target);
        eprintln!("Check your access token and VO memberships using \"fedcloud token list-vos\"");
        return Ok(1);
    }

    if json_output {
        let projects: Vec<serde_json::Value> = rows
            .iter()
            .map(|(project, site)| {
                serde_json::json!({
                    "project_id": project.id,
                    "name": project.name,
                    "enabled": project.enabled,
                    "site": site,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&projects)?);
    } else {
        let rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|(project, site)| vec![project.id, project.name, project.enabled.to_string(), site])
            .collect();
        ui::table::print(&["id", "Name", "enabled", "site"], &rows);
    }
    Ok(report.exit_code())
}

/// The first production endpoint registered for `site`.
async fn single_endpoint(site: &str, config: &Config) -> Result<SiteEndpoint> {
    let query = EndpointQuery::new(config.gocdb_service_type.clone()).site(site);
    catalog(config)?
        .find_endpoints(&query)
        .await
        .context("Failed to query GOCDB")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No {} endpoint found for site {}", config.gocdb_service_type, site))
}

fn target_site(target: &ProjectTarget, config: &Config, what: &str) -> Result<String> {
    let site = target.site.clone().unwrap_or_else(|| config.site.clone());
    if is_all_sites(&site) {
        bail!("Cannot {} for ALL_SITES", what);
    }
    Ok(site)
}

async fn token_command(target: &ProjectTarget, oidc: &OidcArgs, config: &Config) -> Result<i32> {
    let site = target_site(target, config, "get tokens")?;
    let resolved = oidc.resolve(config).await?;
    let endpoint = single_endpoint(&site, config).await?;

    let exchange = FederationExchange::new(config).context("Failed to create HTTP client")?;
    let scoped = exchange
        .scoped_token_for(&endpoint, &resolved.credential, &target.project_id)
        .await
        .with_context(|| format!("Unable to get Keystone token from site {}", site))?;
    print_set_env_command("OS_TOKEN", scoped.as_str());
    Ok(0)
}

async fn env_command(target: &ProjectTarget, oidc: &OidcArgs, config: &Config) -> Result<i32> {
    let site = target_site(target, config, "generate environment variables")?;
    let resolved = oidc.resolve(config).await?;
    let endpoint = single_endpoint(&site, config).await?;

    let exchange = FederationExchange::new(config).context("Failed to create HTTP client")?;
    let scoped = exchange
        .scoped_token_for(&endpoint, &resolved.credential, &target.project_id)
        .await
        .with_context(|| format!("Unable to get Keystone token from site {}", site))?;

    print_comment(&format!("environment for {}", site));
    print_set_env_command("OS_PROJECT_ID", &target.project_id);
    print_set_env_command("OS_AUTH_URL", &endpoint.auth_url);
    print_set_env_command("OS_AUTH_TYPE", &config.os_auth_type);
    print_set_env_command("OS_IDENTITY_PROVIDER", &config.os_identity_provider);
    print_set_env_command("OS_PROTOCOL", scoped.protocol());
    print_set_env_command("OS_ACCESS_TOKEN", resolved.credential.as_str());
    Ok(0)
}
