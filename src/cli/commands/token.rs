//! Access token inspection

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use colored::*;

use crate::auth::{BearerCredential, OidcClient};
use crate::cli::args::OidcArgs;
use crate::config::Config;

#[derive(Args)]
pub struct TokenCommands {
    #[command(subcommand)]
    pub command: TokenSubcommands,
}

#[derive(Subcommand)]
pub enum TokenSubcommands {
    /// Check validity of the access token
    Check {
        #[command(flatten)]
        oidc: OidcArgs,
    },
    /// List VO memberships of the access token
    ListVos {
        #[command(flatten)]
        oidc: OidcArgs,
    },
    /// Print the access token (from mytoken or oidc-agent)
    Issue {
        #[command(flatten)]
        oidc: OidcArgs,
    },
}

pub async fn token_command(args: TokenCommands, config: &Config) -> Result<i32> {
    match args.command {
        TokenSubcommands::Check { oidc } => {
            let resolved = oidc.resolve(config).await?;
            for line in describe_validity(&resolved.credential) {
                println!("{}", line);
            }
            Ok(0)
        }
        TokenSubcommands::ListVos { oidc } => {
            let resolved = oidc.resolve(config).await?;
            let vos = list_vos(&resolved.credential, config).await?;
            if vos.is_empty() {
                eprintln!("{}", "The access token carries no VO membership".yellow());
                return Ok(1);
            }
            println!("{}", vos.join("\n"));
            Ok(0)
        }
        TokenSubcommands::Issue { oidc } => {
            let resolved = oidc.resolve(config).await?;
            println!("{}", resolved.credential.as_str());
            Ok(0)
        }
    }
}

/// VO memberships from the token's own claims, or from the issuer's userinfo
/// endpoint when the token carries none.
async fn list_vos(credential: &BearerCredential, config: &Config) -> Result<Vec<String>> {
    let vos = credential.vos();
    if !vos.is_empty() {
        return Ok(vos);
    }
    let client = crate::http::client(config.http_timeout()).context("Failed to create HTTP client")?;
    let vos = OidcClient::new(client)
        .list_vos(credential)
        .await
        .context("Failed to get VO memberships from the identity provider")?;
    Ok(vos)
}

fn describe_validity(credential: &BearerCredential) -> Vec<String> {
    let remaining = credential.remaining_lifetime(Utc::now());
    let mut lines = Vec::with_capacity(2);
    if let Some(expires_at) = credential.expires_at() {
        lines.push(format!(
            "Access token is valid to {} UTC",
            expires_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    lines.push(if remaining > 24 * 3600 {
        format!("Access token expires in {} days", remaining / (24 * 3600))
    } else {
        format!("Access token expires in {} seconds", remaining)
    });
    lines
}
