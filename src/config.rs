use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Prefix of environment variables overriding config keys.
pub const ENV_PREFIX: &str = "FEDCLOUD_";

/// Environment variable naming an alternative config file.
pub const CONFIG_FILE_ENV: &str = "FEDCLOUD_CONFIG_FILE";

/// Effective client configuration.
///
/// Built once at startup from defaults, the config file and `FEDCLOUD_*`
/// environment variables (later layers win), then passed by reference to
/// everything that needs it. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: String,
    pub vo: String,
    pub oidc_url: String,
    pub gocdb_public_url: String,
    pub gocdb_service_type: String,
    pub site_config_dir: PathBuf,
    pub vault_endpoint: String,
    pub vault_role: String,
    pub vault_mount_point: String,
    pub vault_locker_mount_point: String,
    pub oidc_agent_account: String,
    /// Seconds an access token must remain valid to be used.
    pub min_access_token_time: u64,
    /// Seconds above which a directly supplied token is rejected; 0 disables.
    pub max_access_token_time: u64,
    pub mytoken_server: String,
    pub os_protocol: String,
    pub os_auth_type: String,
    pub os_identity_provider: String,
    /// Federation protocol names tried, in order, when a site does not name one.
    pub federation_protocols: Vec<String>,
    pub max_workers: usize,
    /// Seconds one site's whole pipeline may take.
    pub site_timeout: u64,
    /// Seconds for a single HTTP request.
    pub http_timeout: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub log_file: PathBuf,
    pub log_level: String,
}

fn base_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fedcloud")
}

impl Default for Config {
    fn default() -> Self {
        let base = base_dir();
        Self {
            site: "IISAS-FedCloud".to_string(),
            vo: "vo.access.egi.eu".to_string(),
            oidc_url: "https://aai.egi.eu/auth/realms/egi".to_string(),
            gocdb_public_url: "https://goc.egi.eu/gocdbpi/public/".to_string(),
            gocdb_service_type: "org.openstack.nova".to_string(),
            site_config_dir: base.join("site-config"),
            vault_endpoint: "https://vault.services.fedcloud.eu:8200".to_string(),
            vault_role: String::new(),
            vault_mount_point: "/secrets/".to_string(),
            vault_locker_mount_point: "/v1/cubbyhole/".to_string(),
            oidc_agent_account: "egi".to_string(),
            min_access_token_time: 30,
            max_access_token_time: 24 * 3600,
            mytoken_server: "https://mytoken.data.kit.edu".to_string(),
            os_protocol: "openid".to_string(),
            os_auth_type: "v3oidcaccesstoken".to_string(),
            os_identity_provider: "egi.eu".to_string(),
            federation_protocols: vec!["openid".to_string(), "oidc".to_string()],
            max_workers: 30,
            site_timeout: 300,
            http_timeout: 30,
            retry_attempts: 1,
            retry_base_delay_ms: 500,
            log_file: base.join("logs").join("fedcloud.log"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn default_config_path() -> PathBuf {
        base_dir().join("config.toml")
    }

    /// Load the config file, then apply `FEDCLOUD_*` overrides from the
    /// process environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_file(&Self::resolve_path(explicit_path))?.with_env(std::env::vars())
    }

    /// The config file in use: `explicit_path`, else `FEDCLOUD_CONFIG_FILE`,
    /// else the default location.
    pub fn resolve_path(explicit_path: Option<&Path>) -> PathBuf {
        explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path)
    }

    /// Defaults overlaid with the TOML file at `path`. A missing file yields
    /// the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply `FEDCLOUD_<KEY>` overrides. Unknown keys are ignored.
    pub fn with_env<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_lowercase();
            if self.set(&key, &value)? {
                debug!("Config key {} overridden from environment", key);
            }
        }
        Ok(self)
    }

    /// Set one key from its string form. Returns whether the key is known.
    fn set(&mut self, key: &str, value: &str) -> Result<bool, ConfigError> {
        match key {
            "site" => self.site = value.to_string(),
            "vo" => self.vo = value.to_string(),
            "oidc_url" => self.oidc_url = value.to_string(),
            "gocdb_public_url" => self.gocdb_public_url = value.to_string(),
            "gocdb_service_type" => self.gocdb_service_type = value.to_string(),
            "site_config_dir" => self.site_config_dir = PathBuf::from(value),
            "vault_endpoint" => self.vault_endpoint = value.to_string(),
            "vault_role" => self.vault_role = value.to_string(),
            "vault_mount_point" => self.vault_mount_point = value.to_string(),
            "vault_locker_mount_point" => self.vault_locker_mount_point = value.to_string(),
            "oidc_agent_account" => self.oidc_agent_account = value.to_string(),
            "min_access_token_time" => self.min_access_token_time = parse(key, value)?,
            "max_access_token_time" => self.max_access_token_time = parse(key, value)?,
            "mytoken_server" => self.mytoken_server = value.to_string(),
            "os_protocol" => self.os_protocol = value.to_string(),
            "os_auth_type" => self.os_auth_type = value.to_string(),
            "os_identity_provider" => self.os_identity_provider = value.to_string(),
            "federation_protocols" => {
                self.federation_protocols = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            }
            "max_workers" => self.max_workers = parse(key, value)?,
            "site_timeout" => self.site_timeout = parse(key, value)?,
            "http_timeout" => self.http_timeout = parse(key, value)?,
            "retry_attempts" => self.retry_attempts = parse(key, value)?,
            "retry_base_delay_ms" => self.retry_base_delay_ms = parse(key, value)?,
            "log_file" => self.log_file = PathBuf::from(value),
            "log_level" => self.log_level = value.to_string(),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn min_valid_secs(&self) -> i64 {
        i64::try_from(self.min_access_token_time).unwrap_or(i64::MAX)
    }

    /// `None` when the long-lived token check is disabled.
    pub fn max_valid_secs(&self) -> Option<i64> {
        (self.max_access_token_time > 0)
            .then(|| i64::try_from(self.max_access_token_time).unwrap_or(i64::MAX))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    pub fn site_timeout(&self) -> Duration {
        Duration::from_secs(self.site_timeout)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_workers, 30);
        assert_eq!(config.min_access_token_time, 30);
        assert_eq!(config.federation_protocols, vec!["openid", "oidc"]);
        assert_eq!(config.os_identity_provider, "egi.eu");
        assert_eq!(config.max_valid_secs(), Some(86400));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_overrides_defaults_and_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "site = \"CESNET-MCC\"\nvo = \"fedcloud.egi.eu\"\nmax_workers = 4").unwrap();

        let config = Config::from_file(&path)
            .unwrap()
            .with_env(vars(&[
                ("FEDCLOUD_VO", "vo.access.egi.eu"),
                ("FEDCLOUD_FEDERATION_PROTOCOLS", "oidc, openid"),
                ("FEDCLOUD_UNKNOWN_KEY", "ignored"),
                ("HOME", "/tmp"),
            ]))
            .unwrap();

        assert_eq!(config.site, "CESNET-MCC");
        assert_eq!(config.vo, "vo.access.egi.eu");
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.federation_protocols, vec!["oidc", "openid"]);
        assert_eq!(config.oidc_url, Config::default().oidc_url);
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let err = Config::default()
            .with_env(vars(&[("FEDCLOUD_MAX_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_workers"));
        assert!(err.to_string().contains("FEDCLOUD_MAX_WORKERS"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_workers = \"not a number\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.site = "IFCA-LCG2".to_string();
        config.max_access_token_time = 0;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.max_valid_secs(), None);
    }

    #[test]
    fn test_token_lifetimes_clamp_to_i64() {
        let config = Config {
            min_access_token_time: u64::MAX,
            max_access_token_time: u64::MAX,
            ..Config::default()
        };
        assert_eq!(config.min_valid_secs(), i64::MAX);
        assert_eq!(config.max_valid_secs(), Some(i64::MAX));
    }
}
