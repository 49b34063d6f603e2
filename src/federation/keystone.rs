//! Two-step Keystone federation exchange: a bearer credential is traded for
//! an unscoped federation token, which is then traded for a project-scoped
//! token.

use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use super::SiteEndpoint;
use crate::auth::BearerCredential;
use crate::config::Config;
use crate::error::FederationError;

/// Response header carrying issued Keystone tokens.
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Proof of identity at one site, not yet bound to a project.
#[derive(Clone, PartialEq, Eq)]
pub struct UnscopedToken {
    token: String,
    protocol: String,
}

impl UnscopedToken {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for UnscopedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnscopedToken")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Token valid for exactly one project at one site.
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedToken {
    token: String,
    protocol: String,
    project_id: String,
    site: String,
}

impl ScopedToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn site(&self) -> &str {
        &self.site
    }
}

impl fmt::Debug for ScopedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedToken")
            .field("site", &self.site)
            .field("project_id", &self.project_id)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// A project visible to the federated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    projects: Vec<Project>,
}

/// Performs the federation protocol against site identity endpoints.
///
/// Holds no per-site state: every call starts from scratch and may be retried
/// by the caller.
#[derive(Debug, Clone)]
pub struct FederationExchange {
    client: Client,
    identity_provider: String,
    protocols: Vec<String>,
}

impl FederationExchange {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        Ok(Self::with_client(
            crate::http::client(config.http_timeout())?,
            config.os_identity_provider.clone(),
            config.federation_protocols.clone(),
        ))
    }

    pub fn with_client(client: Client, identity_provider: String, protocols: Vec<String>) -> Self {
        Self {
            client,
            identity_provider,
            protocols,
        }
    }

    /// Protocol names to try for `endpoint`: its own, if known, then the
    /// configured candidates, without repeats.
    pub fn candidate_protocols(&self, endpoint: &SiteEndpoint) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::with_capacity(self.protocols.len() + 1);
        for name in endpoint.protocol.iter().chain(self.protocols.iter()) {
            if !candidates.contains(name) {
                candidates.push(name.clone());
            }
        }
        candidates
    }

    /// Step 1: obtain an unscoped token, negotiating the protocol name.
    pub async fn unscoped_token(
        &self,
        endpoint: &SiteEndpoint,
        credential: &BearerCredential,
    ) -> Result<UnscopedToken, FederationError> {
        let tried = self.candidate_protocols(endpoint);
        for protocol in &tried {
            let path = format!(
                "/v3/OS-FEDERATION/identity_providers/{}/protocols/{}/auth",
                self.identity_provider, protocol
            );
            let url = keystone_url(&endpoint.auth_url, &path)?;
            debug!("Requesting unscoped token from {} via {}", endpoint.site, protocol);

            let response = self
                .client
                .post(&url)
                .bearer_auth(credential.as_str())
                .send()
                .await
                .map_err(|e| FederationError::transport(&url, e))?;

            let status = response.status();
            if status == StatusCode::CREATED {
                if let Some(token) = subject_token(response.headers()) {
                    return Ok(UnscopedToken {
                        token,
                        protocol: protocol.clone(),
                    });
                }
                warn!("{} accepted protocol {} but sent no subject token", endpoint.site, protocol);
            } else {
                debug!(
                    "{} rejected protocol {} with HTTP {}",
                    endpoint.site,
                    protocol,
                    status.as_u16()
                );
            }
        }

        Err(FederationError::NoUsableProtocol {
            auth_url: endpoint.auth_url.clone(),
            tried,
        })
    }

    /// Step 2: exchange an unscoped token for one scoped to `project_id`.
    pub async fn scope(
        &self,
        endpoint: &SiteEndpoint,
        unscoped: &UnscopedToken,
        project_id: &str,
    ) -> Result<ScopedToken, FederationError> {
        let url = keystone_url(&endpoint.auth_url, "/v3/auth/tokens")?;
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["token"],
                    "token": {"id": unscoped.as_str()},
                },
                "scope": {"project": {"id": project_id}},
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FederationError::transport(&url, e))?;

        let status = response.status();
        let token = (status == StatusCode::CREATED)
            .then(|| subject_token(response.headers()))
            .flatten();
        match token {
            Some(token) => Ok(ScopedToken {
                token,
                protocol: unscoped.protocol.clone(),
                project_id: project_id.to_string(),
                site: endpoint.site.clone(),
            }),
            None => Err(FederationError::ScopingFailed {
                project_id: project_id.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// Both steps, strictly in sequence.
    pub async fn scoped_token_for(
        &self,
        endpoint: &SiteEndpoint,
        credential: &BearerCredential,
        project_id: &str,
    ) -> Result<ScopedToken, FederationError> {
        let unscoped = self.unscoped_token(endpoint, credential).await?;
        self.scope(endpoint, &unscoped, project_id).await
    }

    /// Projects the unscoped token's owner may scope to.
    pub async fn projects(
        &self,
        endpoint: &SiteEndpoint,
        unscoped: &UnscopedToken,
    ) -> Result<Vec<Project>, FederationError> {
        let url = keystone_url(&endpoint.auth_url, "/v3/auth/projects")?;
        let response = self
            .client
            .get(&url)
            .header("X-Auth-Token", unscoped.as_str())
            .send()
            .await
            .map_err(|e| FederationError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FederationError::ProjectListing {
                status: status.as_u16(),
            });
        }
        let list: ProjectList = response
            .json()
            .await
            .map_err(|e| FederationError::transport(&url, e))?;
        Ok(list.projects)
    }
}

fn subject_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .filter(|token| !token.is_empty())
}

/// Join an identity API `path` onto a site's auth URL, dropping any API
/// version suffix the site registered.
pub fn keystone_url(auth_url: &str, path: &str) -> Result<String, FederationError> {
    let mut url =
        Url::parse(auth_url).map_err(|_| FederationError::InvalidEndpoint(auth_url.to_string()))?;

    let mut prefix = url.path().trim_end_matches('/');
    for version in ["/v3", "/v2.0"] {
        if let Some(stripped) = prefix.strip_suffix(version) {
            prefix = stripped;
            break;
        }
    }
    let joined = format!("{}/{}", prefix, path.trim_start_matches('/'));
    url.set_path(&joined);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(protocol: Option<&str>) -> SiteEndpoint {
        SiteEndpoint {
            site: "IFCA-LCG2".to_string(),
            service_type: "org.openstack.nova".to_string(),
            auth_url: "https://api.cloud.ifca.es:5000/v3/".to_string(),
            production: true,
            monitored: true,
            protocol: protocol.map(String::from),
        }
    }

    fn exchange() -> FederationExchange {
        FederationExchange::with_client(
            Client::new(),
            "egi.eu".to_string(),
            vec!["openid".to_string(), "oidc".to_string()],
        )
    }

    #[test]
    fn test_keystone_url_strips_version_suffix() {
        assert_eq!(
            keystone_url("https://api.cloud.ifca.es:5000/v3/", "/v3/auth/tokens").unwrap(),
            "https://api.cloud.ifca.es:5000/v3/auth/tokens"
        );
        assert_eq!(
            keystone_url("https://keystone.example.org:5000/v2.0", "/v3/auth/tokens").unwrap(),
            "https://keystone.example.org:5000/v3/auth/tokens"
        );
        assert_eq!(
            keystone_url("https://keystone.example.org", "/v3/auth/projects").unwrap(),
            "https://keystone.example.org/v3/auth/projects"
        );
        assert_eq!(
            keystone_url("https://cloud.example.org/identity/v3", "/v3/auth/tokens").unwrap(),
            "https://cloud.example.org/identity/v3/auth/tokens"
        );
    }

    #[test]
    fn test_keystone_url_rejects_garbage() {
        assert!(matches!(
            keystone_url("not a url", "/v3/auth/tokens"),
            Err(FederationError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_candidate_protocols_put_known_protocol_first() {
        let exchange = exchange();
        assert_eq!(exchange.candidate_protocols(&endpoint(None)), vec!["openid", "oidc"]);
        assert_eq!(exchange.candidate_protocols(&endpoint(Some("oidc"))), vec!["oidc", "openid"]);
        assert_eq!(
            exchange.candidate_protocols(&endpoint(Some("mapped"))),
            vec!["mapped", "openid", "oidc"]
        );
    }

    #[test]
    fn test_token_debug_hides_secret() {
        let token = ScopedToken {
            token: "gAAAAA-secret".to_string(),
            protocol: "openid".to_string(),
            project_id: "p1".to_string(),
            site: "IFCA-LCG2".to_string(),
        };
        assert!(!format!("{:?}", token).contains("gAAAAA-secret"));
    }
}
