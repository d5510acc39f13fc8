//! Token and credential provider seam.
//!
//! The engine never inspects raw tokens. It asks the provider for the
//! current session and works with the decoded claims; a provider failure is
//! treated as "no credentials" rather than an engine error.

use crate::error::SyncResult;
use async_trait::async_trait;
use lagoon_types::{IdentityClaims, UserCredentialState};

/// A snapshot of the caller's credential state.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    /// Whether an access token is present (a signed-in user).
    pub access_token_present: bool,
    /// Decoded identity-token claims, when a token is available.
    pub id_token_claims: Option<IdentityClaims>,
}

impl AuthSession {
    /// The credential state this session represents.
    pub fn credential_state(&self) -> UserCredentialState {
        if self.access_token_present {
            UserCredentialState::Authenticated
        } else {
            UserCredentialState::Unauthenticated
        }
    }
}

/// Supplies the current session on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn current_session(&self) -> SyncResult<AuthSession>;
}

/// A provider that always returns the same session. Useful in tests and in
/// hosts whose credentials do not rotate.
#[derive(Debug, Clone, Default)]
pub struct FixedTokenProvider {
    session: AuthSession,
}

impl FixedTokenProvider {
    pub fn new(session: AuthSession) -> Self {
        Self { session }
    }

    /// A signed-in session carrying the given claims.
    pub fn authenticated(claims: IdentityClaims) -> Self {
        Self::new(AuthSession {
            access_token_present: true,
            id_token_claims: Some(claims),
        })
    }

    /// A guest session with no tokens.
    pub fn unauthenticated() -> Self {
        Self::new(AuthSession::default())
    }
}

#[async_trait]
impl TokenProvider for FixedTokenProvider {
    async fn current_session(&self) -> SyncResult<AuthSession> {
        Ok(self.session.clone())
    }
}
