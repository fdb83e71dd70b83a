//! Verified token claims

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The `aud` claim, which identity providers emit either as a single string
/// or as an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "api"`
    Single(String),
    /// `"aud": ["api", "https://idp/userinfo"]`
    Many(Vec<String>),
}

impl Audience {
    /// Whether `expected` is one of the audiences.
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }

    /// Flatten into a list.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Audience::Single(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Token payload as it comes off the wire, before claim validation.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawClaims {
    pub sub: Option<String>,
    pub iss: Option<String>,
    pub aud: Option<Audience>,
    pub exp: Option<u64>,
    pub permissions: Option<Vec<String>>,
}

/// Decoded, verified claims of a bearer token.
///
/// A `ClaimSet` is only ever produced by
/// [`TokenVerifier`](crate::verifier::TokenVerifier), so holding one means the
/// signature, issuer, audience and expiry have all been checked. On protected
/// routes it is available to handlers as a request extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimSet {
    /// Subject (`sub`) - the principal the token was issued to.
    pub subject: String,
    /// Issuer (`iss`).
    pub issuer: String,
    /// Audiences (`aud`).
    pub audience: Vec<String>,
    /// Expiry (`exp`) as a Unix timestamp.
    pub expires_at: u64,
    /// `None` when the token carried no `permissions` claim at all.
    permissions: Option<BTreeSet<String>>,
}

impl ClaimSet {
    pub(crate) fn new(
        subject: String,
        issuer: String,
        audience: Vec<String>,
        expires_at: u64,
        permissions: Option<Vec<String>>,
    ) -> Self {
        Self {
            subject,
            issuer,
            audience,
            expires_at,
            permissions: permissions.map(|perms| perms.into_iter().collect()),
        }
    }

    /// Granted permissions. Empty when the claim was absent.
    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().flatten().map(String::as_str)
    }

    /// Whether the token carried a `permissions` claim, even an empty one.
    pub fn has_permissions_claim(&self) -> bool {
        self.permissions.is_some()
    }

    /// Check a single permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|perms| perms.contains(permission))
    }
}
