//! Authorization resolution.
//!
//! Two responsibilities, both pure functions over schema-derived rules and
//! the caller's decoded claims:
//!
//! - [`resolve_read_auth_modes`] derives the ordered list of auth modes a
//!   model's read operations should attempt, from the model's rules and the
//!   caller's sign-in state
//! - [`resolve_authorization`] determines the effective owner/group
//!   parameters for one request under one candidate auth mode

use lagoon_types::{
    AuthMode, AuthProvider, AuthStrategy, IdentityClaims, ModelDefinition, UserCredentialState,
};

/// The effective authorization parameters for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationInfo {
    pub auth_mode: AuthMode,
    /// Whether the request must carry an owner argument.
    pub is_owner: bool,
    pub owner_field: Option<String>,
    pub owner_value: Option<String>,
}

impl AuthorizationInfo {
    fn plain(auth_mode: AuthMode) -> Self {
        Self {
            auth_mode,
            is_owner: false,
            owner_field: None,
            owner_value: None,
        }
    }
}

/// Rule ordering used when deriving the auth-mode attempt list: more
/// specific strategies first, then more trusted providers.
fn strategy_priority(strategy: AuthStrategy) -> usize {
    match strategy {
        AuthStrategy::Custom => 0,
        AuthStrategy::Owner => 1,
        AuthStrategy::Groups => 2,
        AuthStrategy::Private => 3,
        AuthStrategy::Public => 4,
    }
}

fn provider_priority(provider: AuthProvider) -> usize {
    match provider {
        AuthProvider::Function => 0,
        AuthProvider::UserPools => 1,
        AuthProvider::Oidc => 2,
        AuthProvider::Iam => 3,
        AuthProvider::ApiKey => 4,
    }
}

/// Derives the ordered, deduplicated auth modes a model's read operations
/// should walk on authorization failures.
///
/// Modes requiring a signed-in user are skipped when there is none. A model
/// with no usable rules falls back to the single `default_auth_mode`.
pub fn resolve_read_auth_modes(
    model: &ModelDefinition,
    signed_in: bool,
    default_auth_mode: AuthMode,
) -> Vec<AuthMode> {
    let mut rules = model.auth_rules.clone();
    rules.sort_by_key(|rule| {
        (
            strategy_priority(rule.strategy),
            provider_priority(rule.effective_provider()),
        )
    });

    let mut modes = Vec::new();
    let mut push = |mode: AuthMode| {
        if !modes.contains(&mode) {
            modes.push(mode);
        }
    };

    for rule in &rules {
        match rule.strategy {
            AuthStrategy::Custom => {
                if matches!(rule.effective_provider(), AuthProvider::Function) {
                    push(AuthMode::Lambda);
                }
            }
            AuthStrategy::Owner | AuthStrategy::Groups => {
                // User-pool and OIDC rules are unusable without a signed-in
                // user; attempting them would fail before reaching the wire.
                if signed_in {
                    match rule.effective_provider() {
                        AuthProvider::UserPools => push(AuthMode::UserPool),
                        AuthProvider::Oidc => push(AuthMode::Oidc),
                        _ => {}
                    }
                }
            }
            AuthStrategy::Private => {
                if signed_in {
                    match rule.effective_provider() {
                        AuthProvider::UserPools => push(AuthMode::UserPool),
                        AuthProvider::Iam => push(AuthMode::Iam),
                        _ => {}
                    }
                }
            }
            AuthStrategy::Public => match rule.effective_provider() {
                AuthProvider::Iam => push(AuthMode::Iam),
                AuthProvider::ApiKey => push(AuthMode::ApiKey),
                _ => {}
            },
        }
    }

    if modes.is_empty() {
        modes.push(default_auth_mode);
    }
    modes
}

/// Determines the effective owner/group authorization parameters for one
/// request attempted under `requested_auth_mode`.
///
/// Returns `None` when no authorization is possible with this mode — the
/// caller must skip the mode entirely. The evaluation order is load-bearing:
/// group rules are checked before owner rules so that a user who qualifies
/// under both keeps group-wide visibility.
pub fn resolve_authorization(
    model: &ModelDefinition,
    credentials: UserCredentialState,
    default_auth_mode: AuthMode,
    claims: Option<&IdentityClaims>,
    requested_auth_mode: Option<AuthMode>,
) -> Option<AuthorizationInfo> {
    let rules = &model.auth_rules;

    // An IAM request against a private/IAM rule needs real credentials.
    let iam_private = requested_auth_mode == Some(AuthMode::Iam)
        && rules.iter().any(|rule| {
            rule.strategy == AuthStrategy::Private
                && rule.effective_provider() == AuthProvider::Iam
        });
    if iam_private && credentials == UserCredentialState::Unauthenticated {
        return None;
    }

    let token_mode = matches!(
        requested_auth_mode,
        Some(AuthMode::Oidc) | Some(AuthMode::UserPool)
    );

    if token_mode {
        if let Some(claims) = claims {
            let group_match = rules
                .iter()
                .filter(|rule| {
                    rule.strategy == AuthStrategy::Groups
                        && matches!(
                            rule.effective_provider(),
                            AuthProvider::UserPools | AuthProvider::Oidc
                        )
                })
                .any(|rule| {
                    let user_groups = claims.groups(rule.group_claim());
                    user_groups.iter().any(|g| rule.groups.contains(g))
                });
            if group_match {
                return Some(AuthorizationInfo::plain(
                    requested_auth_mode.unwrap_or(default_auth_mode),
                ));
            }
        }

        // Owner rules need the owner value extracted from the identity
        // claim to parameterize the request.
        for rule in rules.iter().filter(|rule| {
            rule.strategy == AuthStrategy::Owner
                && matches!(
                    rule.effective_provider(),
                    AuthProvider::UserPools | AuthProvider::Oidc
                )
        }) {
            let owner_value = claims.and_then(|c| c.string_claim(rule.identity_claim()));
            if let Some(owner_value) = owner_value {
                let single_owner = model
                    .field(rule.owner_field())
                    .is_none_or(|field| !field.is_array);
                let owner_arg_required = single_owner && !rule.subscriptions_public;
                return Some(AuthorizationInfo {
                    auth_mode: requested_auth_mode.unwrap_or(default_auth_mode),
                    is_owner: owner_arg_required,
                    owner_field: Some(rule.owner_field().to_string()),
                    owner_value: Some(owner_value),
                });
            }
        }
    }

    Some(AuthorizationInfo::plain(
        requested_auth_mode.unwrap_or(default_auth_mode),
    ))
}
