//! Site discovery and the Keystone federation protocol.

pub mod catalog;
pub mod keystone;
pub mod projects;
pub mod sites;

use serde::Serialize;

pub use catalog::{EndpointCatalog, EndpointQuery, GocdbRegistry, RegistryRecord, SiteRegistry};
pub use keystone::{FederationExchange, Project, ScopedToken, UnscopedToken, keystone_url};
pub use projects::ProjectListing;
pub use sites::{ProjectBinding, SiteConfig, SiteDirectory};

/// A site's identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteEndpoint {
    pub site: String,
    pub service_type: String,
    pub auth_url: String,
    pub production: bool,
    pub monitored: bool,
    /// Federation protocol name, when known without negotiation.
    pub protocol: Option<String>,
}
