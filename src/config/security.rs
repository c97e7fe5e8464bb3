use serde::{Deserialize, Serialize};

/// Security settings: the token signing secret shared with the catalog
/// service and the CORS allowlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// HMAC-SHA256 secret for session token verification. Must match the
    /// issuer. Overridable via `QUIZ_TOKEN_SECRET`.
    #[serde(default)]
    pub token_secret: String,
    /// Comma-separated origins, or `*` for permissive.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_cors_origins() -> String {
    "*".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            cors_origins: default_cors_origins(),
        }
    }
}
