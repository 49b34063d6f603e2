//! Resolution of one usable bearer credential from the sources supplied on
//! the command line or in configuration.

use chrono::{DateTime, Utc};
use colored::Colorize;
use log::{debug, info, warn};
use std::sync::Arc;

use super::agent::{IdentityAgent, OidcAgent};
use super::credentials::BearerCredential;
use super::mytoken::{DelegatedExchange, MytokenClient};
use super::refresh::{OidcClient, RefreshFlow};
use super::sources::{CredentialSource, SourceKind};
use crate::config::Config;
use crate::error::{CredentialError, SourceAttempt};

/// Lifetime bounds a resolved credential must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Seconds the credential must still be valid for.
    pub min_valid_secs: i64,
    /// Directly supplied credentials valid for longer than this are rejected.
    pub max_valid_secs: Option<i64>,
}

impl TokenPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_valid_secs: config.min_valid_secs(),
            max_valid_secs: config.max_valid_secs(),
        }
    }
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            min_valid_secs: 30,
            max_valid_secs: Some(24 * 3600),
        }
    }
}

/// A credential and the source that produced it.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub credential: BearerCredential,
    pub source: SourceKind,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type Notice = Arc<dyn Fn(&str) + Send + Sync>;

/// Shown whenever a refresh token is used.
pub const REFRESH_DEPRECATION: &str = "Warning: exposing refresh tokens is insecure and will be \
     removed in a future version; use oidc-agent or mytoken instead.";

fn print_notice(message: &str) {
    eprintln!("{}", message.yellow());
}

/// Turns a set of candidate sources into one validated credential.
///
/// Sources are tried in [`SourceKind::PRIORITY`] order whatever order they are
/// passed in. A failing source is logged and skipped; resolution only fails
/// when every supplied source failed.
pub struct TokenBroker {
    policy: TokenPolicy,
    agent: Arc<dyn IdentityAgent>,
    delegated: Arc<dyn DelegatedExchange>,
    refresh: Arc<dyn RefreshFlow>,
    clock: Clock,
    notice: Notice,
}

impl TokenBroker {
    /// Broker backed by oidc-agent, a mytoken server and the identity provider.
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let client = crate::http::client(config.http_timeout())?;
        Ok(Self::with_collaborators(
            TokenPolicy::from_config(config),
            Arc::new(OidcAgent::new()),
            Arc::new(MytokenClient::new(client.clone())),
            Arc::new(OidcClient::new(client)),
        ))
    }

    pub fn with_collaborators(
        policy: TokenPolicy,
        agent: Arc<dyn IdentityAgent>,
        delegated: Arc<dyn DelegatedExchange>,
        refresh: Arc<dyn RefreshFlow>,
    ) -> Self {
        Self {
            policy,
            agent,
            delegated,
            refresh,
            clock: Arc::new(Utc::now),
            notice: Arc::new(print_notice),
        }
    }

    /// Replace the wall clock used for lifetime checks.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace where user-facing warnings go. Defaults to stderr.
    pub fn with_notice<F>(mut self, notice: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.notice = Arc::new(notice);
        self
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    pub async fn resolve(
        &self,
        sources: &[CredentialSource],
    ) -> Result<ResolvedCredential, CredentialError> {
        let mut attempts = Vec::new();

        for kind in SourceKind::PRIORITY {
            let Some(source) = sources
                .iter()
                .find(|s| s.kind() == kind && s.is_complete())
            else {
                continue;
            };

            debug!("Trying credential source: {}", kind);
            match self.attempt(source).await {
                Ok(credential) => {
                    info!(
                        "Using access token {} from {} (subject {})",
                        credential.fingerprint(),
                        kind,
                        credential.subject()
                    );
                    return Ok(ResolvedCredential {
                        credential,
                        source: kind,
                    });
                }
                Err(error) => {
                    warn!("Credential source {} failed: {}", kind, error);
                    attempts.push(SourceAttempt {
                        source: kind,
                        error,
                    });
                }
            }
        }

        Err(CredentialError::NoCredentialAvailable { attempts })
    }

    async fn attempt(&self, source: &CredentialSource) -> Result<BearerCredential, CredentialError> {
        match source {
            CredentialSource::Direct(token) => {
                let credential = self.validate(token)?;
                self.check_not_long_lived(&credential)?;
                Ok(credential)
            }
            CredentialSource::DelegatedExchange { token, server_url } => {
                let raw = self.delegated.exchange(token, server_url).await?;
                self.validate(&raw)
            }
            CredentialSource::Agent(account) => {
                let raw = self
                    .agent
                    .access_token(account, self.policy.min_valid_secs)
                    .await?;
                self.validate(&raw)
            }
            CredentialSource::Refresh {
                token,
                client_id,
                client_secret,
                issuer_url,
            } => {
                warn!("Using a refresh token to obtain an access token");
                (self.notice)(REFRESH_DEPRECATION);
                let raw = self
                    .refresh
                    .refresh(token, client_id, client_secret, issuer_url)
                    .await?;
                self.validate(&raw)
            }
        }
    }

    /// Decode and require the minimum remaining lifetime.
    pub fn validate(&self, raw: &str) -> Result<BearerCredential, CredentialError> {
        let credential = BearerCredential::decode(raw)?;
        credential.ensure_usable_at((self.clock)(), self.policy.min_valid_secs)?;
        Ok(credential)
    }

    fn check_not_long_lived(&self, credential: &BearerCredential) -> Result<(), CredentialError> {
        let Some(max_valid_secs) = self.policy.max_valid_secs else {
            return Ok(());
        };
        let remaining_secs = credential.remaining_lifetime((self.clock)());
        if remaining_secs > max_valid_secs {
            return Err(CredentialError::SuspiciousLongLived {
                remaining_secs,
                max_valid_secs,
            });
        }
        Ok(())
    }
}
