use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use super::SourceKind;
use crate::error::CredentialError;

/// A local identity agent holding long-lived grants for named accounts.
#[async_trait]
pub trait IdentityAgent: Send + Sync {
    /// Current access token for `account`, valid for at least `min_valid_secs`.
    async fn access_token(&self, account: &str, min_valid_secs: i64)
    -> Result<String, CredentialError>;
}

/// Talks to oidc-agent through its `oidc-token` helper.
#[derive(Debug, Clone)]
pub struct OidcAgent {
    program: String,
}

impl OidcAgent {
    pub fn new() -> Self {
        Self {
            program: "oidc-token".to_string(),
        }
    }

    /// Use a different helper executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for OidcAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityAgent for OidcAgent {
    async fn access_token(
        &self,
        account: &str,
        min_valid_secs: i64,
    ) -> Result<String, CredentialError> {
        debug!("Requesting access token for account {} from oidc-agent", account);

        let output = Command::new(&self.program)
            .arg(format!("--time={}", min_valid_secs.max(0)))
            .arg(account)
            .output()
            .await
            .map_err(|e| {
                CredentialError::failed(
                    SourceKind::Agent,
                    format!("cannot run {}: {}", self.program, e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::failed(
                SourceKind::Agent,
                format!("account {}: {}", account, stderr.trim()),
            ));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::failed(
                SourceKind::Agent,
                format!("account {}: empty response", account),
            ));
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_helper_is_a_source_failure() {
        let agent = OidcAgent::with_program("fedcloud-test-no-such-oidc-token");
        let err = agent.access_token("egi", 30).await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Source {
                source_kind: SourceKind::Agent,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_stdout_is_the_token() {
        // `echo` prints its arguments, standing in for oidc-token.
        let agent = OidcAgent::with_program("echo");
        let token = agent.access_token("egi", 45).await.unwrap();
        assert_eq!(token, "--time=45 egi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_failure_carries_account() {
        let agent = OidcAgent::with_program("false");
        let err = agent.access_token("egi", 30).await.unwrap_err();
        assert!(err.to_string().contains("account egi"));
    }
}
