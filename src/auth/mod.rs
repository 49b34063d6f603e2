//! Credential decoding and resolution.

pub mod agent;
pub mod broker;
pub mod credentials;
pub mod mytoken;
pub mod refresh;
pub mod sources;

pub use agent::{IdentityAgent, OidcAgent};
pub use broker::{REFRESH_DEPRECATION, ResolvedCredential, TokenBroker, TokenPolicy};
pub use credentials::{BearerCredential, Claims, vos_from_entitlements};
pub use mytoken::{DelegatedExchange, MytokenClient};
pub use refresh::{OidcClient, OidcConfiguration, RefreshFlow};
pub use sources::{CredentialSource, SourceKind};
