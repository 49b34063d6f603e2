//! Static per-site configuration read from YAML files.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::SiteEndpoint;

/// Project a VO is mapped to on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoAuth {
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoConfig {
    pub name: String,
    pub auth: VoAuth,
}

/// One site's configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site name as registered in GOCDB.
    pub gocdb: String,
    /// Keystone auth URL.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub vos: Vec<VoConfig>,
}

impl SiteConfig {
    /// The site's identity endpoint for federation calls.
    pub fn site_endpoint(&self) -> SiteEndpoint {
        SiteEndpoint {
            site: self.gocdb.clone(),
            service_type: "org.openstack.nova".to_string(),
            auth_url: self.endpoint.clone(),
            production: true,
            monitored: true,
            protocol: self.protocol.clone(),
        }
    }
}

/// Where a VO lives on a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBinding {
    pub endpoint: SiteEndpoint,
    pub project_id: String,
}

/// All site configurations, ordered by site name.
#[derive(Debug, Clone, Default)]
pub struct SiteDirectory {
    sites: Vec<SiteConfig>,
}

impl SiteDirectory {
    /// Read every `*.yaml`/`*.yml` file in `dir`. A missing directory yields an
    /// empty directory.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            info!("Site config directory {:?} not found", dir);
            return Ok(Self::default());
        }

        let mut sites = Vec::new();
        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to read site config directory {:?}", dir))?;
        for entry in entries {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read site config {:?}", path))?;
            let site: SiteConfig = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse site config {:?}", path))?;
            debug!("Loaded site config for {} from {:?}", site.gocdb, path);
            sites.push(site);
        }

        Ok(Self::from_sites(sites))
    }

    pub fn from_sites(mut sites: Vec<SiteConfig>) -> Self {
        sites.sort_by(|a, b| a.gocdb.cmp(&b.gocdb));
        Self { sites }
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn list_sites(&self) -> Vec<String> {
        self.sites.iter().map(|site| site.gocdb.clone()).collect()
    }

    pub fn sites(&self) -> &[SiteConfig] {
        &self.sites
    }

    /// Case-insensitive lookup by site name.
    pub fn find(&self, site: &str) -> Option<&SiteConfig> {
        self.sites
            .iter()
            .find(|config| config.gocdb.eq_ignore_ascii_case(site))
    }

    pub fn project_for(&self, site: &str, vo: &str) -> Option<ProjectBinding> {
        let config = self.find(site)?;
        let vo_config = config.vos.iter().find(|v| v.name == vo)?;
        Some(ProjectBinding {
            endpoint: config.site_endpoint(),
            project_id: vo_config.auth.project_id.clone(),
        })
    }

    /// Federation protocol names declared by site configurations.
    pub fn protocols(&self) -> HashMap<String, String> {
        self.sites
            .iter()
            .filter_map(|site| {
                site.protocol
                    .as_ref()
                    .map(|protocol| (site.gocdb.clone(), protocol.clone()))
            })
            .collect()
    }
}
