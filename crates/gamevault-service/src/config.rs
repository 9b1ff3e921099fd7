//! Service configuration.

use std::path::Path;

use gamevault_engine::EngineConfig;
use serde::Deserialize;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. Without one the service keeps state in memory.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size.
    pub database_max_connections: u32,

    /// Identity provider base URL; JWKS is fetched from `<url>/.well-known/jwks.json`.
    pub auth_base_url: String,

    /// Expected JWT audience (default: "gamevault").
    pub auth_audience: String,

    /// Accept `test-token:<uuid>[:admin]` bearer tokens.
    ///
    /// Never enable this outside local development and integration tests.
    pub auth_test_tokens: bool,

    /// Secret used to sign payment client secrets.
    pub gateway_secret: String,

    /// Shared secret for `x-gateway-signature` on payment webhooks.
    pub webhook_secret: Option<String>,

    /// Confirm mock payments as soon as they are created.
    pub gateway_auto_confirm: bool,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Engine tuning.
    pub engine: EngineConfig,
}

/// Payment gateway secrets file structure.
#[derive(Debug, Deserialize)]
struct GatewaySecrets {
    secret: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (gateway_secret, webhook_secret) = load_gateway_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            auth_base_url: std::env::var("AUTH_BASE_URL").unwrap_or(defaults.auth_base_url),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            auth_test_tokens: env_flag("AUTH_TEST_TOKENS"),
            gateway_secret: gateway_secret.unwrap_or(defaults.gateway_secret),
            webhook_secret,
            gateway_auto_confirm: env_flag("GATEWAY_AUTO_CONFIRM"),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            engine: load_engine_config(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_base_url: "https://auth.gamevault.dev".into(),
            auth_audience: "gamevault".into(),
            auth_test_tokens: false,
            gateway_secret: "sk_mock_gamevault".into(),
            webhook_secret: None,
            gateway_auto_confirm: false,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            engine: EngineConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

/// Engine config from `ENGINE_CONFIG` (a JSON document), then per-field overrides.
fn load_engine_config() -> EngineConfig {
    let mut engine = match std::env::var("ENGINE_CONFIG") {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring malformed ENGINE_CONFIG");
            EngineConfig::default()
        }),
        Err(_) => EngineConfig::default(),
    };

    if let Some(v) = env_parse("PURCHASE_RATE_LIMIT") {
        engine.purchase_rate_limit = v;
    }
    if let Some(v) = env_parse("PURCHASE_RATE_WINDOW_SECS") {
        engine.purchase_rate_window_secs = v;
    }
    if let Some(v) = env_parse("PROGRESS_CACHE_TTL_SECS") {
        engine.progress_cache_ttl_secs = v;
    }
    if let Some(v) = env_parse("CONFIG_CACHE_TTL_SECS") {
        engine.config_cache_ttl_secs = v;
    }
    if let Some(v) = env_parse("SCHEDULER_INTERVAL_SECS") {
        engine.scheduler_interval_secs = v;
    }
    if let Some(v) = env_parse("LOCK_TIMEOUT_MS") {
        engine.lock_timeout_ms = v;
    }
    engine
}

/// Load gateway secrets from file or environment.
fn load_gateway_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/gateway.json",
        "gamevault/.secrets/gateway.json",
        "../.secrets/gateway.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<GatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded gateway secrets from file");
            return (Some(secrets.secret), secrets.webhook_secret);
        }
    }

    tracing::debug!("Gateway secrets file not found, using environment variables");
    (
        std::env::var("GATEWAY_SECRET").ok(),
        std::env::var("GATEWAY_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
