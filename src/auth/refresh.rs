//! OIDC discovery, refresh-token grant and userinfo lookups against the
//! federation identity provider.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use super::SourceKind;
use super::credentials::{BearerCredential, vos_from_entitlements};
use crate::error::CredentialError;

/// Scopes requested when refreshing.
pub const REFRESH_SCOPE: &str = "openid email profile eduperson_entitlement";

/// Subset of `/.well-known/openid-configuration` used here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OidcConfiguration {
    pub issuer: Option<String>,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// The refresh-token grant.
#[async_trait]
pub trait RefreshFlow: Send + Sync {
    async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
        issuer_url: &str,
    ) -> Result<String, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    eduperson_entitlement: Vec<String>,
}

/// Identity provider client.
#[derive(Debug, Clone)]
pub struct OidcClient {
    client: Client,
}

impl OidcClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the provider metadata of `issuer_url`.
    pub async fn discover(&self, issuer_url: &str) -> Result<OidcConfiguration, CredentialError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.trim_end_matches('/')
        );
        debug!("OIDC discovery at {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CredentialError::Invalid(format!("OIDC discovery failed: {}", e)))?;
        response
            .json()
            .await
            .map_err(|e| CredentialError::Invalid(format!("OIDC discovery document: {}", e)))
    }

    /// VO memberships of the credential's owner, from the userinfo endpoint of
    /// the credential's issuer.
    pub async fn list_vos(&self, credential: &BearerCredential) -> Result<Vec<String>, CredentialError> {
        let issuer = credential
            .issuer()
            .ok_or_else(|| CredentialError::Invalid("token has no issuer claim".to_string()))?;
        let configuration = self.discover(issuer).await?;
        let endpoint = configuration.userinfo_endpoint.ok_or_else(|| {
            CredentialError::Invalid(format!("issuer {} publishes no userinfo endpoint", issuer))
        })?;

        let info: UserInfo = self
            .client
            .get(&endpoint)
            .bearer_auth(credential.as_str())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CredentialError::Invalid(format!("userinfo request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| CredentialError::Invalid(format!("userinfo response: {}", e)))?;

        Ok(vos_from_entitlements(&info.eduperson_entitlement))
    }
}

#[async_trait]
impl RefreshFlow for OidcClient {
    async fn refresh(
        &self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
        issuer_url: &str,
    ) -> Result<String, CredentialError> {
        let configuration = self
            .discover(issuer_url)
            .await
            .map_err(|e| CredentialError::failed(SourceKind::Refresh, e.to_string()))?;

        let response = self
            .client
            .post(&configuration.token_endpoint)
            .basic_auth(client_id, Some(client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", REFRESH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::failed(SourceKind::Refresh, e.to_string()))?;

        let status = response.status();
        debug!("Refresh grant status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Refresh grant rejected: HTTP {}", status.as_u16());
            return Err(CredentialError::failed(
                SourceKind::Refresh,
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::failed(SourceKind::Refresh, e.to_string()))?;
        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::failed(SourceKind::Refresh, "no access_token in response"))
    }
}
