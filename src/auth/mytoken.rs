use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::SourceKind;
use crate::error::CredentialError;

/// Relative path of the access-token endpoint on a mytoken server.
pub const ACCESS_TOKEN_PATH: &str = "/api/v0/token/access";

/// A service trading a delegation token for a short-lived access token.
#[async_trait]
pub trait DelegatedExchange: Send + Sync {
    async fn exchange(&self, token: &str, server_url: &str) -> Result<String, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

/// Client for a mytoken server.
#[derive(Debug, Clone)]
pub struct MytokenClient {
    client: Client,
}

impl MytokenClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DelegatedExchange for MytokenClient {
    async fn exchange(&self, token: &str, server_url: &str) -> Result<String, CredentialError> {
        let url = format!("{}{}", server_url.trim_end_matches('/'), ACCESS_TOKEN_PATH);
        debug!("Exchanging mytoken at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "grant_type": "mytoken",
                "mytoken": token,
            }))
            .send()
            .await
            .map_err(|e| CredentialError::failed(SourceKind::DelegatedExchange, e.to_string()))?;

        let status = response.status();
        debug!("Mytoken exchange status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::failed(
                SourceKind::DelegatedExchange,
                format!("HTTP {} from {}: {}", status.as_u16(), url, body.trim()),
            ));
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::failed(SourceKind::DelegatedExchange, e.to_string()))?;
        body.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            CredentialError::failed(SourceKind::DelegatedExchange, "no access_token in response")
        })
    }
}
