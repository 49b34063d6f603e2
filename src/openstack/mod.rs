//! Running the `openstack` command-line client against federated sites.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::auth::BearerCredential;
use crate::config::Config;
use crate::dispatch::SiteOperation;
use crate::error::SiteError;
use crate::federation::{FederationExchange, ProjectBinding, SiteDirectory};

/// Name of the client executable.
pub const OPENSTACK_CLIENT: &str = "openstack";

/// Whether `program` can be found on `PATH`.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Identity settings passed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub auth_type: String,
    /// Used when the site configuration names no protocol.
    pub protocol: String,
    pub identity_provider: String,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auth_type: config.os_auth_type.clone(),
            protocol: config.os_protocol.clone(),
            identity_provider: config.os_identity_provider.clone(),
        }
    }
}

/// How the client authenticates to the site.
#[derive(Debug, Clone)]
pub enum CallMode {
    /// Hand the bearer credential over and let the client federate.
    AccessToken,
    /// Federate here and hand over a project-scoped Keystone token.
    ScopedToken(FederationExchange),
}

/// What the client printed on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Json(serde_json::Value),
    Text(String),
}

impl std::fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutput::Json(value) => {
                let pretty = serde_json::to_string_pretty(value).map_err(|_| std::fmt::Error)?;
                f.write_str(&pretty)
            }
            CommandOutput::Text(text) => f.write_str(text.trim_end()),
        }
    }
}

/// One `openstack` invocation, repeated per site.
pub struct OpenStackCommand {
    credential: BearerCredential,
    vo: String,
    command: Vec<String>,
    json_output: bool,
    sites: Arc<SiteDirectory>,
    settings: ClientSettings,
    mode: CallMode,
    program: String,
}

impl OpenStackCommand {
    pub fn new(
        credential: BearerCredential,
        vo: impl Into<String>,
        command: Vec<String>,
        sites: Arc<SiteDirectory>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            credential,
            vo: vo.into(),
            command,
            json_output: false,
            sites,
            settings,
            mode: CallMode::AccessToken,
            program: OPENSTACK_CLIENT.to_string(),
        }
    }

    /// Ask the client for JSON output.
    pub fn json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }

    pub fn mode(mut self, mode: CallMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run a different executable.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn vo(&self) -> &str {
        &self.vo
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    fn binding(&self, site: &str) -> Result<ProjectBinding, SiteError> {
        self.sites.project_for(site, &self.vo).ok_or_else(|| {
            SiteError::MissingResource(format!("VO {} not found on site {}", self.vo, site))
        })
    }

    /// Full argument list for `site`, authentication options after the
    /// user's command.
    pub async fn arguments(&self, site: &str) -> Result<Vec<String>, SiteError> {
        let binding = self.binding(site)?;
        let mut args = self.command.clone();

        match &self.mode {
            CallMode::AccessToken => {
                let protocol = binding
                    .endpoint
                    .protocol
                    .clone()
                    .unwrap_or_else(|| self.settings.protocol.clone());
                args.extend([
                    "--os-auth-url".to_string(),
                    binding.endpoint.auth_url.clone(),
                    "--os-auth-type".to_string(),
                    self.settings.auth_type.clone(),
                    "--os-protocol".to_string(),
                    protocol,
                    "--os-identity-provider".to_string(),
                    self.settings.identity_provider.clone(),
                    "--os-access-token".to_string(),
                    self.credential.as_str().to_string(),
                ]);
            }
            CallMode::ScopedToken(exchange) => {
                let scoped = exchange
                    .scoped_token_for(&binding.endpoint, &self.credential, &binding.project_id)
                    .await?;
                args.extend([
                    "--os-auth-url".to_string(),
                    binding.endpoint.auth_url.clone(),
                    "--os-auth-type".to_string(),
                    "v3token".to_string(),
                    "--os-token".to_string(),
                    scoped.as_str().to_string(),
                ]);
            }
        }
        args.extend(["--os-project-id".to_string(), binding.project_id]);
        if self.json_output {
            args.extend(["--format".to_string(), "json".to_string()]);
        }
        Ok(args)
    }
}

#[async_trait]
impl SiteOperation for OpenStackCommand {
    type Output = CommandOutput;

    async fn run(&self, site: &str) -> Result<CommandOutput, SiteError> {
        let args = self.arguments(site).await?;
        debug!("{}: running {} {}", site, self.program, self.command_line());

        let output = Command::new(&self.program)
            .args(&args)
            .env_remove("OS_TOKEN")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SiteError::Command {
                code: output.status.code().unwrap_or(-1),
                message: format!("{}{}", stderr, stdout),
            });
        }

        if self.json_output {
            if let Ok(value) = serde_json::from_str(&stdout) {
                return Ok(CommandOutput::Json(value));
            }
        }
        Ok(CommandOutput::Text(stdout))
    }
}

/// `OS_*` variables describing an access-token session at `binding`.
pub fn session_environment(
    binding: &ProjectBinding,
    credential: &BearerCredential,
    settings: &ClientSettings,
) -> Vec<(&'static str, String)> {
    let protocol = binding
        .endpoint
        .protocol
        .clone()
        .unwrap_or_else(|| settings.protocol.clone());
    vec![
        ("OS_AUTH_URL", binding.endpoint.auth_url.clone()),
        ("OS_AUTH_TYPE", settings.auth_type.clone()),
        ("OS_PROTOCOL", protocol),
        ("OS_IDENTITY_PROVIDER", settings.identity_provider.clone()),
        ("OS_ACCESS_TOKEN", credential.as_str().to_string()),
        ("OS_PROJECT_ID", binding.project_id.clone()),
    ]
}

/// Start an interactive client session for `site` and `vo`, returning its
/// exit code.
pub async fn interactive(
    sites: &SiteDirectory,
    site: &str,
    vo: &str,
    credential: &BearerCredential,
    settings: &ClientSettings,
) -> Result<i32> {
    let binding = sites
        .project_for(site, vo)
        .ok_or_else(|| anyhow!("VO {} not found on site {}", vo, site))?;

    let status = Command::new(OPENSTACK_CLIENT)
        .envs(session_environment(&binding, credential, settings))
        .env_remove("OS_TOKEN")
        .status()
        .await
        .with_context(|| format!("Failed to start {}", OPENSTACK_CLIENT))?;
    Ok(status.code().unwrap_or(1))
}
