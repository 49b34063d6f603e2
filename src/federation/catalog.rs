//! Endpoint discovery through the federation's site registry (GOCDB).

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

use super::SiteEndpoint;
use crate::config::Config;
use crate::error::CatalogError;

/// One service endpoint as published by the registry, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub site: String,
    pub service_type: String,
    pub url: String,
    pub production: bool,
    pub monitored: bool,
}

/// Source of sites and their service endpoints.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// Endpoints of `service_type`, optionally restricted to monitored ones or
    /// to one site.
    async fn service_endpoints(
        &self,
        service_type: &str,
        monitored_only: bool,
        site: Option<&str>,
    ) -> Result<Vec<RegistryRecord>, CatalogError>;

    /// Names of all certified sites.
    async fn site_names(&self) -> Result<Vec<String>, CatalogError>;
}

/// GOCDB public programmatic interface.
#[derive(Debug, Clone)]
pub struct GocdbRegistry {
    client: Client,
    base_url: String,
}

impl GocdbRegistry {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<String, CatalogError> {
        debug!("GOCDB query {:?}", params);
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| CatalogError::Transport {
                url: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CatalogError::Transport {
            url: self.base_url.clone(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SiteRegistry for GocdbRegistry {
    async fn service_endpoints(
        &self,
        service_type: &str,
        monitored_only: bool,
        site: Option<&str>,
    ) -> Result<Vec<RegistryRecord>, CatalogError> {
        let mut params = vec![
            ("method", "get_service_endpoint"),
            ("service_type", service_type),
        ];
        if monitored_only {
            params.push(("monitored", "Y"));
        }
        if let Some(site) = site {
            params.push(("sitename", site));
        }
        let xml = self.query(&params).await?;
        parse_service_endpoints(&xml)
    }

    async fn site_names(&self) -> Result<Vec<String>, CatalogError> {
        let xml = self
            .query(&[
                ("method", "get_site_list"),
                ("certification_status", "Certified"),
            ])
            .await?;
        parse_site_list(&xml)
    }
}

/// Parse a `get_service_endpoint` response.
pub fn parse_service_endpoints(xml: &str) -> Result<Vec<RegistryRecord>, CatalogError> {
    let document = roxmltree::Document::parse(xml)?;
    let records = document
        .descendants()
        .filter(|node| node.has_tag_name("SERVICE_ENDPOINT"))
        .map(|node| {
            let field = |name: &str| {
                node.children()
                    .find(|child| child.has_tag_name(name))
                    .and_then(|child| child.text())
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string()
            };
            RegistryRecord {
                site: field("SITENAME"),
                service_type: field("SERVICE_TYPE"),
                url: field("URL"),
                production: field("IN_PRODUCTION") == "Y",
                monitored: field("NODE_MONITORED") == "Y",
            }
        })
        .filter(|record| !record.site.is_empty() && !record.url.is_empty())
        .collect();
    Ok(records)
}

/// Parse a `get_site_list` response.
pub fn parse_site_list(xml: &str) -> Result<Vec<String>, CatalogError> {
    let document = roxmltree::Document::parse(xml)?;
    Ok(document
        .descendants()
        .filter(|node| node.has_tag_name("SITE"))
        .filter_map(|node| node.attribute("NAME"))
        .map(String::from)
        .collect())
}

/// Filters applied to an endpoint query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointQuery {
    pub service_type: String,
    pub production_only: bool,
    pub monitored_only: bool,
    pub site: Option<String>,
}

impl EndpointQuery {
    /// Production, monitored endpoints of `service_type` at every certified site.
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            production_only: true,
            monitored_only: true,
            site: None,
        }
    }

    pub fn site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn include_non_production(mut self) -> Self {
        self.production_only = false;
        self
    }

    pub fn include_unmonitored(mut self) -> Self {
        self.monitored_only = false;
        self
    }
}

type RecordKey = (String, bool, Option<String>);

/// Registry front end caching what it has already fetched for the lifetime
/// of the invocation.
pub struct EndpointCatalog {
    registry: Arc<dyn SiteRegistry>,
    protocols: HashMap<String, String>,
    site_names: OnceCell<Vec<String>>,
    records: RwLock<HashMap<RecordKey, Vec<RegistryRecord>>>,
}

impl EndpointCatalog {
    pub fn new(config: &Config) -> reqwest::Result<Self> {
        let client = crate::http::client(config.http_timeout())?;
        Ok(Self::with_registry(Arc::new(GocdbRegistry::new(
            client,
            config.gocdb_public_url.clone(),
        ))))
    }

    pub fn with_registry(registry: Arc<dyn SiteRegistry>) -> Self {
        Self {
            registry,
            protocols: HashMap::new(),
            site_names: OnceCell::new(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Federation protocol names known per site, attached to discovered
    /// endpoints.
    pub fn with_protocols(mut self, protocols: HashMap<String, String>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Certified site names, fetched at most once.
    pub async fn list_sites(&self) -> Result<Vec<String>, CatalogError> {
        let names = self
            .site_names
            .get_or_try_init(|| async {
                let names = self.registry.site_names().await?;
                info!("Site registry lists {} certified sites", names.len());
                Ok::<_, CatalogError>(names)
            })
            .await?;
        Ok(names.clone())
    }

    /// Endpoints matching `query`, ordered by site name.
    pub async fn find_endpoints(&self, query: &EndpointQuery) -> Result<Vec<SiteEndpoint>, CatalogError> {
        let records = self
            .records_for(&query.service_type, query.monitored_only, query.site.as_deref())
            .await?;

        let allowed: HashSet<String> = match &query.site {
            Some(site) => HashSet::from([site.clone()]),
            None => self.list_sites().await?.into_iter().collect(),
        };

        let mut endpoints: Vec<SiteEndpoint> = records
            .into_iter()
            .filter(|record| allowed.contains(&record.site))
            .filter(|record| !query.production_only || record.production)
            .filter(|record| !query.monitored_only || record.monitored)
            .map(|record| SiteEndpoint {
                protocol: self.protocols.get(&record.site).cloned(),
                site: record.site,
                service_type: record.service_type,
                auth_url: record.url,
                production: record.production,
                monitored: record.monitored,
            })
            .collect();
        endpoints.sort_by(|a, b| a.site.cmp(&b.site).then_with(|| a.auth_url.cmp(&b.auth_url)));
        Ok(endpoints)
    }

    async fn records_for(
        &self,
        service_type: &str,
        monitored_only: bool,
        site: Option<&str>,
    ) -> Result<Vec<RegistryRecord>, CatalogError> {
        let key = (service_type.to_string(), monitored_only, site.map(String::from));
        if let Ok(cache) = self.records.read() {
            if let Some(records) = cache.get(&key) {
                debug!("Endpoint query served from cache");
                return Ok(records.clone());
            }
        }

        let records = self
            .registry
            .service_endpoints(service_type, monitored_only, site)
            .await?;
        if let Ok(mut cache) = self.records.write() {
            cache.insert(key, records.clone());
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<results>
  <SERVICE_ENDPOINT PRIMARY_KEY="1G0">
    <HOSTNAME>api.cloud.ifca.es</HOSTNAME>
    <SERVICE_TYPE>org.openstack.nova</SERVICE_TYPE>
    <IN_PRODUCTION>Y</IN_PRODUCTION>
    <NODE_MONITORED>Y</NODE_MONITORED>
    <SITENAME>IFCA-LCG2</SITENAME>
    <URL>https://api.cloud.ifca.es:5000/v3/</URL>
  </SERVICE_ENDPOINT>
  <SERVICE_ENDPOINT PRIMARY_KEY="2G0">
    <SERVICE_TYPE>org.openstack.nova</SERVICE_TYPE>
    <IN_PRODUCTION>N</IN_PRODUCTION>
    <NODE_MONITORED>Y</NODE_MONITORED>
    <SITENAME>TEST-SITE</SITENAME>
    <URL> https://keystone.test.example:5000/v3 </URL>
  </SERVICE_ENDPOINT>
  <SERVICE_ENDPOINT PRIMARY_KEY="3G0">
    <SERVICE_TYPE>org.openstack.nova</SERVICE_TYPE>
    <IN_PRODUCTION>Y</IN_PRODUCTION>
    <SITENAME>NO-URL</SITENAME>
  </SERVICE_ENDPOINT>
</results>"#;

    #[test]
    fn test_parse_service_endpoints() {
        let records = parse_service_endpoints(ENDPOINTS).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].site, "IFCA-LCG2");
        assert!(records[0].production);
        assert!(records[0].monitored);
        assert_eq!(records[1].url, "https://keystone.test.example:5000/v3");
        assert!(!records[1].production);
    }

    #[test]
    fn test_parse_site_list() {
        let xml = r#"<results>
            <SITE ID="1" NAME="IFCA-LCG2" COUNTRY="Spain"/>
            <SITE ID="2" NAME="CESNET-MCC" COUNTRY="Czech Republic"/>
            <SITE ID="3"/>
        </results>"#;
        assert_eq!(parse_site_list(xml).unwrap(), vec!["IFCA-LCG2", "CESNET-MCC"]);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(matches!(
            parse_service_endpoints("<results><SERVICE_ENDPOINT>"),
            Err(CatalogError::Xml(_))
        ));
    }

    #[test]
    fn test_query_builder() {
        let query = EndpointQuery::new("org.openstack.nova")
            .site("IFCA-LCG2")
            .include_non_production();
        assert!(!query.production_only);
        assert!(query.monitored_only);
        assert_eq!(query.site.as_deref(), Some("IFCA-LCG2"));
    }
}
