use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;

use super::{FederationExchange, Project, SiteEndpoint};
use crate::auth::BearerCredential;
use crate::dispatch::SiteOperation;
use crate::error::SiteError;

/// Lists the projects the credential's owner can access at each site.
pub struct ProjectListing {
    exchange: FederationExchange,
    credential: BearerCredential,
    endpoints: HashMap<String, Vec<SiteEndpoint>>,
}

impl ProjectListing {
    pub fn new(
        exchange: FederationExchange,
        credential: BearerCredential,
        endpoints: Vec<SiteEndpoint>,
    ) -> Self {
        let mut by_site: HashMap<String, Vec<SiteEndpoint>> = HashMap::new();
        for endpoint in endpoints {
            by_site.entry(endpoint.site.clone()).or_default().push(endpoint);
        }
        Self {
            exchange,
            credential,
            endpoints: by_site,
        }
    }

    /// Sites with at least one known endpoint, sorted.
    pub fn sites(&self) -> Vec<String> {
        let mut sites: Vec<String> = self.endpoints.keys().cloned().collect();
        sites.sort();
        sites
    }
}

#[async_trait]
impl SiteOperation for ProjectListing {
    type Output = Vec<Project>;

    async fn run(&self, site: &str) -> Result<Vec<Project>, SiteError> {
        let endpoints = self
            .endpoints
            .get(site)
            .filter(|endpoints| !endpoints.is_empty())
            .ok_or_else(|| SiteError::MissingResource(format!("no endpoint known for site {}", site)))?;

        let mut projects = Vec::new();
        for endpoint in endpoints {
            debug!("Listing projects at {}", endpoint.auth_url);
            let unscoped = self.exchange.unscoped_token(endpoint, &self.credential).await?;
            for project in self.exchange.projects(endpoint, &unscoped).await? {
                if !projects.contains(&project) {
                    projects.push(project);
                }
            }
        }
        Ok(projects)
    }
}
