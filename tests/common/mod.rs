//! Helpers shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;

use fedcloud_cli::auth::BearerCredential;

/// Fixed "now" used by tests that pin the clock.
pub const NOW: i64 = 1_750_000_000;

pub fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(NOW, 0).unwrap()
}

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    iss: &'a str,
    exp: i64,
    iat: i64,
    eduperson_entitlement: Vec<String>,
}

/// Sign an access token for `sub` expiring at `exp`.
pub fn mint(sub: &str, exp: i64) -> String {
    mint_with_vos(sub, exp, &[])
}

pub fn mint_with_vos(sub: &str, exp: i64, vos: &[&str]) -> String {
    let claims = TestClaims {
        sub,
        iss: "https://aai.example.org/auth/realms/egi",
        exp,
        iat: NOW - 60,
        eduperson_entitlement: vos
            .iter()
            .map(|vo| format!("urn:mace:egi.eu:group:{}:role=member#aai.egi.eu", vo))
            .collect(),
    };
    sign(&claims)
}

/// Sign arbitrary claims.
pub fn sign<C: Serialize>(claims: &C) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(b"integration-test-secret"),
    )
    .unwrap()
}

/// A credential valid for an hour after [`NOW`].
pub fn credential(sub: &str) -> BearerCredential {
    BearerCredential::decode(&mint(sub, NOW + 3600)).unwrap()
}
