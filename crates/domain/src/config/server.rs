use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_3210")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Bearer token for the protected API surface, read directly from config.
    /// Takes priority over `api_token_env`. Leave unset in committed config;
    /// prefer the env var in deployment.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Environment variable holding the API bearer token when `api_token`
    /// is unset. If neither is set, protected routes run unauthenticated.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// HMAC-SHA256 secret for `osa` JWT bearer auth, read directly from
    /// config. Takes priority over `jwt_secret_env`.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Environment variable holding the JWT HMAC secret when `jwt_secret`
    /// is unset. If neither is set, JWT auth is disabled for the `osa` API.
    #[serde(default = "d_jwt_secret_env")]
    pub jwt_secret_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3210,
            host: "127.0.0.1".into(),
            cors: CorsConfig::default(),
            api_token: None,
            api_token_env: d_api_token_env(),
            jwt_secret: None,
            jwt_secret_env: d_jwt_secret_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3210() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}
fn d_api_token_env() -> String {
    "SA_API_TOKEN".into()
}
fn d_jwt_secret_env() -> String {
    "SA_JWT_SECRET".into()
}
