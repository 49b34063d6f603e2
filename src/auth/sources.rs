use std::fmt;

/// Where a bearer credential can come from.
///
/// Constructed once per invocation from flags and configuration. The broker
/// honours at most one of them per resolution, in the fixed order given by
/// [`SourceKind::PRIORITY`].
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// An access token supplied directly.
    Direct(String),
    /// An account name held by a local oidc-agent.
    Agent(String),
    /// A mytoken traded at a mytoken server for an access token.
    DelegatedExchange { token: String, server_url: String },
    /// An OIDC refresh token plus client identity.
    Refresh {
        token: String,
        client_id: String,
        client_secret: String,
        issuer_url: String,
    },
}

// Hand-written so secrets never reach logs through `{:?}`.
impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Direct(_) => f.write_str("Direct(..)"),
            CredentialSource::Agent(account) => write!(f, "Agent({})", account),
            CredentialSource::DelegatedExchange { server_url, .. } => {
                write!(f, "DelegatedExchange(.., {})", server_url)
            }
            CredentialSource::Refresh {
                client_id,
                issuer_url,
                ..
            } => write!(f, "Refresh(.., {}, {})", client_id, issuer_url),
        }
    }
}

impl CredentialSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            CredentialSource::Direct(_) => SourceKind::Direct,
            CredentialSource::Agent(_) => SourceKind::Agent,
            CredentialSource::DelegatedExchange { .. } => SourceKind::DelegatedExchange,
            CredentialSource::Refresh { .. } => SourceKind::Refresh,
        }
    }

    /// Whether every input the source needs is present.
    pub fn is_complete(&self) -> bool {
        match self {
            CredentialSource::Direct(token) => !token.trim().is_empty(),
            CredentialSource::Agent(account) => !account.trim().is_empty(),
            CredentialSource::DelegatedExchange { token, server_url } => {
                !token.is_empty() && !server_url.is_empty()
            }
            CredentialSource::Refresh {
                token,
                client_id,
                client_secret,
                issuer_url,
            } => {
                !token.is_empty()
                    && !client_id.is_empty()
                    && !client_secret.is_empty()
                    && !issuer_url.is_empty()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Direct,
    DelegatedExchange,
    Agent,
    Refresh,
}

impl SourceKind {
    /// Resolution order. Never reorder.
    pub const PRIORITY: [SourceKind; 4] = [
        SourceKind::Direct,
        SourceKind::DelegatedExchange,
        SourceKind::Agent,
        SourceKind::Refresh,
    ];
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Direct => "access token",
            SourceKind::DelegatedExchange => "mytoken",
            SourceKind::Agent => "oidc-agent",
            SourceKind::Refresh => "refresh token",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_inputs_are_incomplete() {
        assert!(!CredentialSource::Direct("  ".into()).is_complete());
        assert!(!CredentialSource::Agent(String::new()).is_complete());
        assert!(
            !CredentialSource::Refresh {
                token: "rt".into(),
                client_id: "id".into(),
                client_secret: String::new(),
                issuer_url: "https://issuer".into(),
            }
            .is_complete()
        );
        assert!(
            CredentialSource::DelegatedExchange {
                token: "mt".into(),
                server_url: "https://mytoken".into(),
            }
            .is_complete()
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let source = CredentialSource::Refresh {
            token: "refresh-secret".into(),
            client_id: "client".into(),
            client_secret: "client-secret".into(),
            issuer_url: "https://issuer".into(),
        };
        let debug = format!("{:?}", source);
        assert!(!debug.contains("refresh-secret"));
        assert!(!debug.contains("client-secret"));
        assert_eq!(format!("{:?}", CredentialSource::Direct("tok".into())), "Direct(..)");
    }
}
