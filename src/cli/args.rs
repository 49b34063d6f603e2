//! Argument groups shared by several commands.

use anyhow::{Context, Result};
use clap::Args;
use log::debug;

use crate::auth::{CredentialSource, ResolvedCredential, TokenBroker};
use crate::config::Config;

/// Keywords selecting every site.
pub const ALL_SITES_KEYWORDS: [&str; 2] = ["ALL_SITES", "ALL"];

pub fn is_all_sites(site: &str) -> bool {
    ALL_SITES_KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(site))
}

/// Where the access token comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct OidcArgs {
    /// OIDC access token
    #[arg(long, env = "OIDC_ACCESS_TOKEN", hide_env_values = true)]
    pub oidc_access_token: Option<String>,

    /// Account name in oidc-agent
    #[arg(long, env = "OIDC_AGENT_ACCOUNT")]
    pub oidc_agent_account: Option<String>,

    /// Mytoken to exchange for an access token
    #[arg(long, env = "FEDCLOUD_MYTOKEN", hide_env_values = true)]
    pub mytoken: Option<String>,

    /// Mytoken server [default: from config]
    #[arg(long)]
    pub mytoken_server: Option<String>,

    /// OIDC refresh token (deprecated)
    #[arg(long, env = "OIDC_REFRESH_TOKEN", hide_env_values = true)]
    pub oidc_refresh_token: Option<String>,

    /// OIDC client id, used with the refresh token
    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: Option<String>,

    /// OIDC client secret, used with the refresh token
    #[arg(long, env = "OIDC_CLIENT_SECRET", hide_env_values = true)]
    pub oidc_client_secret: Option<String>,

    /// OIDC issuer URL [default: from config]
    #[arg(long, env = "OIDC_URL")]
    pub oidc_url: Option<String>,
}

fn given(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl OidcArgs {
    /// Candidate sources from the flags. The configured oidc-agent account is
    /// used only when nothing was given explicitly.
    pub fn sources(&self, config: &Config) -> Vec<CredentialSource> {
        let mut sources = Vec::new();

        if let Some(token) = given(&self.oidc_access_token) {
            sources.push(CredentialSource::Direct(token));
        }
        if let Some(token) = given(&self.mytoken) {
            sources.push(CredentialSource::DelegatedExchange {
                token,
                server_url: given(&self.mytoken_server).unwrap_or_else(|| config.mytoken_server.clone()),
            });
        }
        if let Some(account) = given(&self.oidc_agent_account) {
            sources.push(CredentialSource::Agent(account));
        }
        if let Some(token) = given(&self.oidc_refresh_token) {
            sources.push(CredentialSource::Refresh {
                token,
                client_id: given(&self.oidc_client_id).unwrap_or_default(),
                client_secret: given(&self.oidc_client_secret).unwrap_or_default(),
                issuer_url: given(&self.oidc_url).unwrap_or_else(|| config.oidc_url.clone()),
            });
        }

        if sources.is_empty() && !config.oidc_agent_account.trim().is_empty() {
            debug!("No credential given, falling back to oidc-agent account {}", config.oidc_agent_account);
            sources.push(CredentialSource::Agent(config.oidc_agent_account.clone()));
        }
        sources
    }

    pub async fn resolve(&self, config: &Config) -> Result<ResolvedCredential> {
        let broker = TokenBroker::new(config).context("Failed to create HTTP client")?;
        let resolved = broker.resolve(&self.sources(config)).await?;
        Ok(resolved)
    }
}

/// `--site` and `--vo` for commands working on one site (or all of them).
#[derive(Args, Debug, Clone, Default)]
pub struct SiteVoArgs {
    /// Site name in GOCDB, or ALL_SITES [default: from config]
    #[arg(long, env = "EGI_SITE")]
    pub site: Option<String>,

    /// Virtual organization [default: from config]
    #[arg(long, env = "EGI_VO")]
    pub vo: Option<String>,
}

impl SiteVoArgs {
    pub fn site(&self, config: &Config) -> String {
        given(&self.site).unwrap_or_else(|| config.site.clone())
    }

    pub fn vo(&self, config: &Config) -> String {
        given(&self.vo).unwrap_or_else(|| config.vo.clone())
    }
}

/// `--site` or `--all-sites`.
#[derive(Args, Debug, Clone, Default)]
pub struct SiteFilterArgs {
    /// Site name in GOCDB, or ALL_SITES [default: from config]
    #[arg(long, env = "EGI_SITE")]
    pub site: Option<String>,

    /// Use all sites
    #[arg(short, long)]
    pub all_sites: bool,
}

impl SiteFilterArgs {
    /// `None` means every site.
    pub fn site(&self, config: &Config) -> Option<String> {
        if self.all_sites {
            return None;
        }
        let site = given(&self.site).unwrap_or_else(|| config.site.clone());
        (!is_all_sites(&site)).then_some(site)
    }
}
