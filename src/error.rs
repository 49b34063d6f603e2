//! Error taxonomy shared by the credential, federation and dispatch layers.
//!
//! Library code returns these typed errors; the CLI layer wraps them in
//! `anyhow` with context before reporting them to the user.

use std::fmt;

use crate::auth::SourceKind;

/// Failures while resolving or validating a bearer credential.
///
/// Always fatal for the whole invocation: no site can be contacted without a
/// credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid access token: {0}")]
    Invalid(String),

    #[error("access token expired or expires in {remaining_secs}s (minimum is {min_valid_secs}s)")]
    Expired {
        remaining_secs: i64,
        min_valid_secs: i64,
    },

    #[error(
        "access token is valid for {remaining_secs}s, more than the allowed {max_valid_secs}s; \
         was a refresh token or mytoken passed as an access token?"
    )]
    SuspiciousLongLived {
        remaining_secs: i64,
        max_valid_secs: i64,
    },

    #[error("{source_kind} failed: {message}")]
    Source {
        source_kind: SourceKind,
        message: String,
    },

    #[error("no usable access token: {}", describe_attempts(.attempts))]
    NoCredentialAvailable { attempts: Vec<SourceAttempt> },
}

/// One failed attempt recorded by the token broker.
#[derive(Debug)]
pub struct SourceAttempt {
    pub source: SourceKind,
    pub error: CredentialError,
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

fn describe_attempts(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no credential source was supplied (access token, mytoken, oidc-agent account or refresh token)"
            .to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CredentialError {
    pub(crate) fn failed(source_kind: SourceKind, message: impl Into<String>) -> Self {
        CredentialError::Source {
            source_kind,
            message: message.into(),
        }
    }
}

/// How a request to a remote service failed below the HTTP status level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Tls,
    Request,
    Body,
}

impl TransportErrorKind {
    /// Classify a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            if mentions_certificate(error) {
                TransportErrorKind::Tls
            } else {
                TransportErrorKind::Connect
            }
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        }
    }
}

// TLS failures are reported by hyper as connect errors; the only reliable
// signal left is the source chain.
fn mentions_certificate(error: &reqwest::Error) -> bool {
    let mut source: Option<&dyn std::error::Error> = Some(error);
    while let Some(err) = source {
        let text = err.to_string().to_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = err.source();
    }
    false
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Tls => "TLS failure",
            TransportErrorKind::Request => "request failed",
            TransportErrorKind::Body => "invalid response body",
        };
        f.write_str(name)
    }
}

/// Failures of the two-step federation exchange against one site.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("no federation protocol accepted by {auth_url} (tried {})", .tried.join(", "))]
    NoUsableProtocol { auth_url: String, tried: Vec<String> },

    #[error("unable to get a scoped token for project {project_id} (HTTP {status})")]
    ScopingFailed { project_id: String, status: u16 },

    #[error("unable to list projects (HTTP {status})")]
    ProjectListing { status: u16 },

    #[error("invalid identity endpoint {0}")]
    InvalidEndpoint(String),

    #[error("{kind} talking to {url}: {message}")]
    Transport {
        kind: TransportErrorKind,
        url: String,
        message: String,
    },
}

impl FederationError {
    pub(crate) fn transport(url: &str, error: reqwest::Error) -> Self {
        FederationError::Transport {
            kind: TransportErrorKind::from_reqwest_error(&error),
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Failures querying the site registry.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("site registry request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("site registry returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("site registry returned malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

/// Failure kinds a [`SiteOperation`](crate::dispatch::SiteOperation) may report.
///
/// The dispatcher maps each onto one [`SiteOutcome`](crate::dispatch::SiteOutcome).
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    /// The project or VO does not exist on the site. Expected and filterable.
    #[error("{0}")]
    MissingResource(String),

    /// The delegated cloud command ran and failed.
    #[error("command failed with exit code {code}: {message}")]
    Command { code: i32, message: String },

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SiteError {
    /// Whether a retry from scratch may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SiteError::Federation(FederationError::Transport { .. })
                | SiteError::Catalog(CatalogError::Transport { .. })
        )
    }
}

/// Configuration layering failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for FEDCLOUD_{}: {reason}", .key.to_uppercase())]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Failures talking to the secret store.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("cannot log in to the secret store: {0}")]
    Login(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("secret store returned HTTP {status} for {path}")]
    Status { status: u16, path: String },

    #[error("secret store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid secret argument {0:?}: expected key=value")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_attempt_list_explains_missing_sources() {
        let err = CredentialError::NoCredentialAvailable { attempts: vec![] };
        assert!(err.to_string().contains("no credential source was supplied"));
    }

    #[test]
    fn attempt_list_names_every_source() {
        let err = CredentialError::NoCredentialAvailable {
            attempts: vec![
                SourceAttempt {
                    source: SourceKind::Direct,
                    error: CredentialError::Expired {
                        remaining_secs: -5,
                        min_valid_secs: 30,
                    },
                },
                SourceAttempt {
                    source: SourceKind::Agent,
                    error: CredentialError::failed(SourceKind::Agent, "agent not running"),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("access token"));
        assert!(message.contains("oidc-agent"));
        assert!(message.contains("agent not running"));
    }

    #[test]
    fn only_transport_failures_are_transient() {
        let transport = SiteError::Federation(FederationError::Transport {
            kind: TransportErrorKind::Timeout,
            url: "https://keystone.example".into(),
            message: "timed out".into(),
        });
        assert!(transport.is_transient());
        assert!(!SiteError::MissingResource("no vo".into()).is_transient());
        assert!(
            !SiteError::Command {
                code: 1,
                message: "boom".into()
            }
            .is_transient()
        );
    }
}
