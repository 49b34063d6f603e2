//! Personal and VO-shared secrets kept in the federation's Vault service.

use log::debug;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::auth::BearerCredential;
use crate::config::Config;
use crate::error::SecretError;

/// One operation on the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretCommand {
    List { path: String },
    Get { path: String },
    Put { path: String, data: BTreeMap<String, String> },
    Delete { path: String },
}

impl SecretCommand {
    pub fn path(&self) -> &str {
        match self {
            SecretCommand::List { path }
            | SecretCommand::Get { path }
            | SecretCommand::Put { path, .. }
            | SecretCommand::Delete { path } => path,
        }
    }

    fn method(&self) -> Method {
        match self {
            SecretCommand::List { .. } | SecretCommand::Get { .. } => Method::GET,
            SecretCommand::Put { .. } => Method::POST,
            SecretCommand::Delete { .. } => Method::DELETE,
        }
    }

    fn returns_data(&self) -> bool {
        matches!(self, SecretCommand::List { .. } | SecretCommand::Get { .. })
    }
}

/// Parse `key=value` arguments. Values may contain `=`.
pub fn secret_params_to_dict<S: AsRef<str>>(params: &[S]) -> Result<BTreeMap<String, String>, SecretError> {
    if params.is_empty() {
        return Err(SecretError::InvalidArgument(String::new()));
    }
    params
        .iter()
        .map(|param| {
            let param = param.as_ref();
            match param.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(SecretError::InvalidArgument(param.to_string())),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    pub endpoint: String,
    pub role: String,
    pub mount_point: String,
    pub locker_mount_point: String,
}

impl VaultSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.vault_endpoint.clone(),
            role: config.vault_role.clone(),
            mount_point: config.vault_mount_point.clone(),
            locker_mount_point: config.vault_locker_mount_point.clone(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn url(&self, mount: &str, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            mount.trim_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Identity {
    /// A Vault token belonging to a user, created by `method`.
    User { user_id: String, method: String },
    /// A single-use locker token with only a cubbyhole.
    Locker,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: LookupData,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    display_name: String,
}

/// Authenticated Vault session.
pub struct VaultClient {
    client: Client,
    settings: VaultSettings,
    token: String,
    identity: Identity,
}

impl VaultClient {
    /// Log in with an access token through Vault's JWT auth method.
    pub async fn login(
        client: Client,
        settings: VaultSettings,
        credential: &BearerCredential,
    ) -> Result<Self, SecretError> {
        let url = settings.api_url("auth/jwt/login");
        debug!("Logging in to Vault at {}", url);
        let response = client
            .post(&url)
            .json(&json!({"role": settings.role, "jwt": credential.as_str()}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::Login(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Login(e.to_string()))?;

        Ok(Self {
            client,
            settings,
            token: login.auth.client_token,
            identity: Identity::User {
                user_id: credential.subject().to_string(),
                method: "jwt".to_string(),
            },
        })
    }

    /// Use an existing Vault token; its owner is looked up.
    pub async fn with_token(client: Client, settings: VaultSettings, token: String) -> Result<Self, SecretError> {
        let url = settings.api_url("auth/token/lookup-self");
        let response = client
            .get(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SecretError::Login(format!(
                "cannot look up Vault token owner (HTTP {})",
                status.as_u16()
            )));
        }
        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| SecretError::Login(e.to_string()))?;

        let (method, user_id) = lookup.data.display_name.split_once('-').ok_or_else(|| {
            SecretError::Login(format!("unexpected token owner {:?}", lookup.data.display_name))
        })?;
        debug!("Vault token created by {} for {}", method, user_id);

        Ok(Self {
            identity: Identity::User {
                user_id: user_id.to_string(),
                method: method.to_string(),
            },
            client,
            settings,
            token,
        })
    }

    pub fn with_locker_token(client: Client, settings: VaultSettings, token: String) -> Result<Self, SecretError> {
        if token.trim().is_empty() {
            return Err(SecretError::Unsupported("Locker token cannot be empty".to_string()));
        }
        Ok(Self {
            client,
            settings,
            token,
            identity: Identity::Locker,
        })
    }

    /// URL of `path` in the caller's folder, or in the folder shared by `vo`.
    pub fn secret_url(&self, path: &str, vo: Option<&str>) -> Result<String, SecretError> {
        let path = path.trim_start_matches('/');
        match (&self.identity, vo) {
            (Identity::Locker, Some(_)) => Err(SecretError::Unsupported(
                "VO-shared folders are not supported by locker tokens".to_string(),
            )),
            (Identity::Locker, None) => Ok(self.settings.url(&self.settings.locker_mount_point, path)),
            (Identity::User { method, .. }, Some(vo)) => {
                if method != "oidc" {
                    return Err(SecretError::Unsupported(
                        "VO-shared folders are accessible only for tokens created by the OIDC method"
                            .to_string(),
                    ));
                }
                let mount = format!("v1/{}", self.settings.mount_point.trim_matches('/'));
                Ok(self.settings.url(&mount, &format!("vos/{}/{}", vo, path)))
            }
            (Identity::User { user_id, .. }, None) => {
                let mount = format!("v1/{}", self.settings.mount_point.trim_matches('/'));
                Ok(self.settings.url(&mount, &format!("users/{}/{}", user_id, path)))
            }
        }
    }

    /// Run `command`. List and get return the server's response body.
    pub async fn execute(&self, command: &SecretCommand, vo: Option<&str>) -> Result<Option<Value>, SecretError> {
        let url = self.secret_url(command.path(), vo)?;
        debug!("Vault {} {}", command.method(), url);

        let mut request = self
            .client
            .request(command.method(), &url)
            .header("X-Vault-Token", &self.token);
        match command {
            SecretCommand::List { .. } => request = request.query(&[("list", "true")]),
            SecretCommand::Put { data, .. } => request = request.json(data),
            SecretCommand::Get { .. } | SecretCommand::Delete { .. } => {}
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SecretError::Status {
                status: status.as_u16(),
                path: command.path().to_string(),
            });
        }
        if command.returns_data() {
            Ok(Some(response.json().await?))
        } else {
            Ok(None)
        }
    }
}
