//! Configuration for the sync engine.

use lagoon_types::AuthMode;

/// Tunables shared by both processors.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum records requested per page.
    pub page_size: usize,
    /// Ceiling on records retrieved per model in one sync pass.
    pub max_records_per_model: usize,
    /// Auth mode used when a model declares no authorization rules.
    pub default_auth_mode: AuthMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 1_000,
            max_records_per_model: 10_000,
            default_auth_mode: AuthMode::ApiKey,
        }
    }
}
