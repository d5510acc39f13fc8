//! Authorization rules and identity-token claims.
//!
//! Rules are schema-derived and immutable. Claim extraction is a pure
//! function over an explicit [`IdentityClaims`] value — never a dynamic
//! property probe against an opaque token payload.

use crate::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One of the closed set of authorization mechanisms usable for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    ApiKey,
    Iam,
    Oidc,
    UserPool,
    Lambda,
    None,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "apiKey",
            Self::Iam => "iam",
            Self::Oidc => "oidc",
            Self::UserPool => "userPool",
            Self::Lambda => "lambda",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The access-scoping strategy of an authorization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthStrategy {
    Custom,
    Owner,
    Groups,
    Private,
    Public,
}

/// The identity provider backing an authorization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthProvider {
    Function,
    UserPools,
    Oidc,
    Iam,
    ApiKey,
}

/// A single authorization rule attached to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRule {
    pub strategy: AuthStrategy,
    /// Absent provider falls back per strategy, see [`Self::effective_provider`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<AuthProvider>,
    /// Field holding the owning identity. Defaults to `owner`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_field: Option<String>,
    /// Token claim carrying the caller's identity. Defaults to `sub`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_claim: Option<String>,
    /// Groups granted access under a `Groups` strategy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Token claim carrying the caller's group memberships.
    /// Defaults to `cognito:groups`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_claim: Option<String>,
    /// Whether subscriptions under this rule are served without an owner
    /// argument.
    #[serde(default)]
    pub subscriptions_public: bool,
}

impl AuthorizationRule {
    /// A minimal rule with the given strategy and provider.
    pub fn new(strategy: AuthStrategy, provider: Option<AuthProvider>) -> Self {
        Self {
            strategy,
            provider,
            owner_field: None,
            identity_claim: None,
            groups: Vec::new(),
            group_claim: None,
            subscriptions_public: false,
        }
    }

    /// The provider, applying per-strategy defaults:
    /// private defaults to user pools, public to API key, custom to function,
    /// owner/groups to user pools.
    pub fn effective_provider(&self) -> AuthProvider {
        if let Some(provider) = self.provider {
            return provider;
        }
        match self.strategy {
            AuthStrategy::Public => AuthProvider::ApiKey,
            AuthStrategy::Custom => AuthProvider::Function,
            AuthStrategy::Private | AuthStrategy::Owner | AuthStrategy::Groups => {
                AuthProvider::UserPools
            }
        }
    }

    /// The owner field name, defaulted.
    pub fn owner_field(&self) -> &str {
        self.owner_field.as_deref().unwrap_or("owner")
    }

    /// The identity claim name, defaulted.
    pub fn identity_claim(&self) -> &str {
        self.identity_claim.as_deref().unwrap_or("sub")
    }

    /// The group claim name, defaulted.
    pub fn group_claim(&self) -> &str {
        self.group_claim.as_deref().unwrap_or("cognito:groups")
    }
}

/// The caller's credential state at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCredentialState {
    /// No session could be established at all.
    None,
    /// A session exists but holds no access token (guest access).
    Unauthenticated,
    /// A signed-in user with an access token.
    Authenticated,
}

/// Decoded identity-token claims.
///
/// Extraction helpers are pure and return options; an absent claim is never
/// an error here — callers decide what absence means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityClaims {
    values: JsonObject,
}

impl IdentityClaims {
    pub fn new(values: JsonObject) -> Self {
        Self { values }
    }

    /// Raw claim lookup.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A claim rendered as a string. Strings come back verbatim; numbers are
    /// formatted. Structured values are not owner identities and yield `None`.
    pub fn string_claim(&self, name: &str) -> Option<String> {
        match self.values.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Group memberships carried under `claim`.
    ///
    /// Accepts an array of strings, a single string, or a JSON-encoded array
    /// inside a string — all shapes observed in real token payloads.
    pub fn groups(&self, claim: &str) -> Vec<String> {
        match self.values.get(claim) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => match serde_json::from_str::<Vec<String>>(s) {
                Ok(parsed) => parsed,
                Err(_) => vec![s.clone()],
            },
            _ => Vec::new(),
        }
    }
}
