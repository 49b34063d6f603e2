//! Secret management in the federation's Vault

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use colored::*;
use serde_json::Value;

use crate::cli::args::OidcArgs;
use crate::config::Config;
use crate::secret::{SecretCommand, VaultClient, VaultSettings, secret_params_to_dict};

#[derive(Args)]
pub struct SecretCommands {
    #[command(subcommand)]
    pub command: SecretSubcommands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct VaultArgs {
    #[command(flatten)]
    pub oidc: OidcArgs,

    /// Access secrets shared by this VO instead of personal ones
    #[arg(long)]
    pub vo: Option<String>,

    /// Locker token for a one-off cubbyhole
    #[arg(long, env = "FEDCLOUD_LOCKER_TOKEN", hide_env_values = true)]
    pub locker_token: Option<String>,

    /// Existing Vault token
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum SecretSubcommands {
    /// List secrets in a folder
    List {
        /// Folder path
        #[arg(default_value = "")]
        short_path: String,
        #[command(flatten)]
        vault: VaultArgs,
    },
    /// Read a secret, or one key of it
    Get {
        short_path: String,
        /// Print only this key
        key: Option<String>,
        #[arg(short, long, value_enum, default_value_t)]
        output_format: OutputFormat,
        #[command(flatten)]
        vault: VaultArgs,
    },
    /// Store a secret from key=value pairs
    Put {
        short_path: String,
        #[arg(value_name = "KEY=VALUE", required = true)]
        secrets: Vec<String>,
        #[command(flatten)]
        vault: VaultArgs,
    },
    /// Delete a secret
    Delete {
        short_path: String,
        #[command(flatten)]
        vault: VaultArgs,
    },
}

pub async fn secret_command(args: SecretCommands, config: &Config) -> Result<i32> {
    let (command, vault, output_format, key) = match args.command {
        SecretSubcommands::List { short_path, vault } => {
            (SecretCommand::List { path: short_path }, vault, OutputFormat::Text, None)
        }
        SecretSubcommands::Get {
            short_path,
            key,
            output_format,
            vault,
        } => (SecretCommand::Get { path: short_path }, vault, output_format, key),
        SecretSubcommands::Put {
            short_path,
            secrets,
            vault,
        } => {
            let data = secret_params_to_dict(&secrets)?;
            (SecretCommand::Put { path: short_path, data }, vault, OutputFormat::Text, None)
        }
        SecretSubcommands::Delete { short_path, vault } => {
            (SecretCommand::Delete { path: short_path }, vault, OutputFormat::Text, None)
        }
    };

    let client = connect(&vault, config).await?;
    let response = client
        .execute(&command, vault.vo.as_deref())
        .await
        .with_context(|| format!("Error when accessing secrets at {}", command.path()))?;

    match (&command, response) {
        (SecretCommand::List { .. }, Some(body)) => {
            for name in list_keys(&body) {
                println!("{}", name);
            }
        }
        (SecretCommand::Get { path }, Some(body)) => {
            let data = body.get("data").cloned().unwrap_or(Value::Null);
            match key {
                Some(key) => match data.get(&key) {
                    Some(Value::String(value)) => println!("{}", value),
                    Some(value) => println!("{}", value),
                    None => bail!("Key {} not found in secret {}", key, path),
                },
                None => print_data(&data, output_format)?,
            }
        }
        (SecretCommand::Put { path, .. }, _) => {
            println!("{} Secret {} stored", "✓".bright_green().bold(), path);
        }
        (SecretCommand::Delete { path }, _) => {
            println!("{} Secret {} deleted", "✓".bright_green().bold(), path);
        }
        _ => {}
    }
    Ok(0)
}

async fn connect(vault: &VaultArgs, config: &Config) -> Result<VaultClient> {
    let client = crate::http::client(config.http_timeout()).context("Failed to create HTTP client")?;
    let settings = VaultSettings::from_config(config);

    if let Some(token) = vault.locker_token.clone().filter(|t| !t.is_empty()) {
        return Ok(VaultClient::with_locker_token(client, settings, token)?);
    }
    if let Some(token) = vault.vault_token.clone().filter(|t| !t.is_empty()) {
        return Ok(VaultClient::with_token(client, settings, token).await?);
    }
    let resolved = vault.oidc.resolve(config).await?;
    Ok(VaultClient::login(client, settings, &resolved.credential).await?)
}

fn list_keys(body: &Value) -> Vec<String> {
    body.pointer("/data/keys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn print_data(data: &Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
        OutputFormat::Text => {
            if let Some(map) = data.as_object() {
                for (key, value) in map {
                    match value {
                        Value::String(s) => println!("{}: {}", key, s),
                        other => println!("{}: {}", key, other),
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_keys() {
        let body = json!({"data": {"keys": ["app", "db/"]}});
        assert_eq!(list_keys(&body), vec!["app", "db/"]);
        assert!(list_keys(&json!({})).is_empty());
    }
}
