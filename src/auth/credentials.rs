//! Bearer credential decoding.
//!
//! Access tokens are JWTs issued by the federation identity provider. Only the
//! payload is read here; the signature is checked by whoever the token is
//! presented to.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

use crate::error::CredentialError;

/// Entitlement shape asserting VO membership. The VO is the first segment after
/// the group prefix; sub-group segments are skipped.
static VO_ENTITLEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^urn:mace:egi\.eu:group:([^:]+):(?:[^:]+:)*role=member#aai\.egi\.eu$")
        .expect("VO entitlement pattern is valid")
});

/// Claims read from an access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub eduperson_entitlement: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// An access token together with its decoded claims.
///
/// Immutable once decoded. Never persisted by this crate.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerCredential {
    raw: String,
    claims: Claims,
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("token", &self.fingerprint())
            .field("claims", &self.claims)
            .finish()
    }
}

impl BearerCredential {
    /// Decode a raw access token without verifying its signature.
    ///
    /// Expiry is not enforced here; see [`BearerCredential::ensure_usable_at`].
    pub fn decode(raw: &str) -> Result<Self, CredentialError> {
        let raw = raw.trim();
        let header = decode_header(raw)
            .map_err(|e| CredentialError::Invalid(format!("token header: {}", e)))?;

        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        let token = decode::<Claims>(raw, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| CredentialError::Invalid(format!("token claims: {}", e)))?;

        Ok(Self {
            raw: raw.to_string(),
            claims: token.claims,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claims.iss.as_deref()
    }

    /// Expiry as a UTC timestamp, `None` if `exp` is out of range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.claims.exp, 0).single()
    }

    /// Seconds left until expiry at `now`; negative once expired.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> i64 {
        self.claims.exp.saturating_sub(now.timestamp())
    }

    /// `now < exp - min_valid`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, min_valid_secs: i64) -> bool {
        self.remaining_lifetime(now) > min_valid_secs
    }

    /// Fail with [`CredentialError::Expired`] unless usable at `now`.
    pub fn ensure_usable_at(
        &self,
        now: DateTime<Utc>,
        min_valid_secs: i64,
    ) -> Result<(), CredentialError> {
        if self.is_usable_at(now, min_valid_secs) {
            Ok(())
        } else {
            Err(CredentialError::Expired {
                remaining_secs: self.remaining_lifetime(now),
                min_valid_secs,
            })
        }
    }

    /// VO memberships asserted by the entitlement claim, sorted and deduplicated.
    pub fn vos(&self) -> Vec<String> {
        vos_from_entitlements(&self.claims.eduperson_entitlement)
    }

    /// Last eight characters of the token, suitable for logs.
    pub fn fingerprint(&self) -> String {
        let suffix: String = self.raw.chars().rev().take(8).collect();
        format!("…{}", suffix.chars().rev().collect::<String>())
    }
}

/// Extract VO names from `eduperson_entitlement` values.
pub fn vos_from_entitlements<S: AsRef<str>>(entitlements: &[S]) -> Vec<String> {
    let mut vos: Vec<String> = entitlements
        .iter()
        .filter_map(|claim| {
            VO_ENTITLEMENT
                .captures(claim.as_ref())
                .and_then(|caps| caps.get(1))
                .map(|vo| vo.as_str().to_string())
        })
        .collect();
    vos.sort();
    vos.dedup();
    vos
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn signed(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"unit-test")).unwrap()
    }

    #[test]
    fn test_decode_reads_subject_and_expiry() {
        let raw = signed(json!({"sub": "u1", "exp": 1_700_000_000, "iss": "https://aai.egi.eu/auth/realms/egi"}));
        let credential = BearerCredential::decode(&raw).unwrap();
        assert_eq!(credential.subject(), "u1");
        assert_eq!(credential.claims().exp, 1_700_000_000);
        assert_eq!(credential.issuer(), Some("https://aai.egi.eu/auth/realms/egi"));
        assert_eq!(credential.as_str(), raw);
    }

    #[test]
    fn test_decode_ignores_signature_and_expiry() {
        let raw = signed(json!({"sub": "u1", "exp": 10}));
        let (unsigned, _) = raw.rsplit_once('.').unwrap();
        let credential = BearerCredential::decode(&format!("{}.c2lnbmF0dXJl", unsigned)).unwrap();
        assert_eq!(credential.claims().exp, 10);
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(matches!(
            BearerCredential::decode("not-a-jwt"),
            Err(CredentialError::Invalid(_))
        ));
        assert!(matches!(
            BearerCredential::decode("a.b.c.d"),
            Err(CredentialError::Invalid(_))
        ));
        assert!(matches!(
            BearerCredential::decode("a.!!!.c"),
            Err(CredentialError::Invalid(_))
        ));
        // missing exp
        assert!(matches!(
            BearerCredential::decode(&signed(json!({"sub": "u1"}))),
            Err(CredentialError::Invalid(_))
        ));
        // missing sub
        assert!(matches!(
            BearerCredential::decode(&signed(json!({"exp": 10}))),
            Err(CredentialError::Invalid(_))
        ));
    }

    #[test]
    fn test_usability_boundary() {
        let exp = 1_000_000;
        let credential = BearerCredential::decode(&signed(json!({"sub": "u1", "exp": exp}))).unwrap();
        let min_valid = 30;
        let boundary = Utc.timestamp_opt(exp - min_valid, 0).unwrap();

        assert!(!credential.is_usable_at(boundary, min_valid));
        assert!(credential.is_usable_at(boundary - chrono::Duration::seconds(1), min_valid));
        assert!(matches!(
            credential.ensure_usable_at(boundary, min_valid),
            Err(CredentialError::Expired { remaining_secs: 30, min_valid_secs: 30 })
        ));
    }

    #[test]
    fn test_remaining_lifetime_saturates_at_extreme_expiry() {
        let with_exp = |exp: i64| BearerCredential {
            raw: "raw".to_string(),
            claims: Claims {
                sub: "u1".to_string(),
                exp,
                iss: None,
                iat: None,
                eduperson_entitlement: Vec::new(),
                groups: Vec::new(),
            },
        };
        let after_epoch = Utc.timestamp_opt(1_750_000_000, 0).unwrap();
        let before_epoch = Utc.timestamp_opt(-1_000, 0).unwrap();

        let ancient = with_exp(i64::MIN);
        assert_eq!(ancient.remaining_lifetime(after_epoch), i64::MIN);
        assert!(!ancient.is_usable_at(after_epoch, 30));
        assert!(ancient.ensure_usable_at(after_epoch, 30).is_err());

        let forever = with_exp(i64::MAX);
        assert_eq!(forever.remaining_lifetime(before_epoch), i64::MAX);
        assert!(forever.is_usable_at(before_epoch, 30));
        assert!(forever.expires_at().is_none());
    }

    #[test]
    fn test_fingerprint_keeps_token_suffix() {
        let raw = signed(json!({"sub": "u1", "exp": 10}));
        let credential = BearerCredential::decode(&raw).unwrap();
        let suffix: String = raw.chars().skip(raw.chars().count() - 8).collect();
        assert_eq!(credential.fingerprint(), format!("…{}", suffix));
    }

    #[test]
    fn test_vo_extraction_takes_first_segment() {
        let entitlements = vec![
            "urn:mace:egi.eu:group:vo.access.egi.eu:role=member#aai.egi.eu",
            "urn:mace:egi.eu:group:vo.access.egi.eu:role=vm_operator#aai.egi.eu",
            "urn:mace:egi.eu:group:eosc-synergy.eu:admins:role=member#aai.egi.eu",
            "urn:mace:egi.eu:group:fedcloud.egi.eu:role=member#aai.egi.eu",
            "urn:mace:egi.eu:group:fedcloud.egi.eu:role=member#aai.egi.eu",
            "urn:geant:example.org:group:other:role=member#example.org",
        ];
        assert_eq!(
            vos_from_entitlements(&entitlements),
            vec!["eosc-synergy.eu", "fedcloud.egi.eu", "vo.access.egi.eu"]
        );
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let raw = signed(json!({"sub": "u1", "exp": 10}));
        let credential = BearerCredential::decode(&raw).unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains(&raw));
    }
}
