// Server configuration
//
// Everything is read from the environment; the engine reads its own
// FLOWLINE_* variables through EngineConfig::from_env.

use std::time::Duration;

use axum::http::HeaderValue;
use flowline_engine::{DispatchMode, EngineConfig};

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";

/// Outbound email provider settings
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// HTTP endpoint of the provider's send API
    pub endpoint: String,
    pub api_key: Option<String>,
    pub default_from: String,
}

/// Configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// PostgreSQL URL; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Run migrations on startup
    pub run_migrations: bool,
    /// Period of the background scheduler; `None` disables it
    pub scheduler_interval: Option<Duration>,
    /// Route prefix, e.g. `/api`
    pub api_prefix: String,
    pub cors_origins: Vec<HeaderValue>,
    /// Email provider; emails are only logged when unset
    pub email: Option<EmailConfig>,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            database_url: None,
            max_connections: 10,
            run_migrations: true,
            scheduler_interval: Some(Duration::from_secs(60)),
            api_prefix: String::new(),
            cors_origins: vec![],
            email: None,
            engine: EngineConfig::default().with_dispatch(DispatchMode::Background),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIND_ADDR`: HTTP listen address (default: "0.0.0.0:9000")
    /// - `DATABASE_URL`: PostgreSQL URL (in-memory store when unset)
    /// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
    /// - `RUN_MIGRATIONS`: "false" to skip migrations on startup
    /// - `SCHEDULER_INTERVAL_SECS`: Scheduler period, 0 disables (default: 60)
    /// - `API_PREFIX`: Route prefix (default: none)
    /// - `CORS_ALLOWED_ORIGINS`: Comma-separated origins
    /// - `EMAIL_API_URL`, `EMAIL_API_KEY`, `EMAIL_FROM`: Email provider
    /// - `FLOWLINE_DISPATCH`: "inline" to process runs before responding
    ///   (default: "background")
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let scheduler_interval = match env_parse::<u64>("SCHEDULER_INTERVAL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.scheduler_interval,
        };

        let email = std::env::var("EMAIL_API_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|endpoint| EmailConfig {
                endpoint,
                api_key: std::env::var("EMAIL_API_KEY").ok().filter(|s| !s.is_empty()),
                default_from: std::env::var("EMAIL_FROM")
                    .unwrap_or_else(|_| "noreply@flowline.local".to_string()),
            });

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(defaults.run_migrations),
            scheduler_interval,
            api_prefix: std::env::var("API_PREFIX").unwrap_or_default(),
            cors_origins: parse_origins(&std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_default()),
            email,
            engine: server_dispatch(
                EngineConfig::from_env(),
                std::env::var("FLOWLINE_DISPATCH").ok().as_deref(),
            ),
        }
    }
}

/// Requests must not wait on action execution unless asked to
fn server_dispatch(engine: EngineConfig, requested: Option<&str>) -> EngineConfig {
    match requested.map(str::parse::<DispatchMode>) {
        Some(Ok(mode)) => engine.with_dispatch(mode),
        _ => engine.with_dispatch(DispatchMode::Background),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_origins(value: &str) -> Vec<HeaderValue> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        let origins = parse_origins("https://app.example.com, https://admin.example.com,,");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://app.example.com");
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert!(config.database_url.is_none());
        assert_eq!(config.scheduler_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.engine.dispatch, DispatchMode::Background);
    }

    #[test]
    fn test_dispatch_defaults_to_background() {
        let engine = server_dispatch(EngineConfig::default(), None);
        assert_eq!(engine.dispatch, DispatchMode::Background);

        let engine = server_dispatch(EngineConfig::default(), Some("sometimes"));
        assert_eq!(engine.dispatch, DispatchMode::Background);

        let engine = server_dispatch(EngineConfig::default(), Some("inline"));
        assert_eq!(engine.dispatch, DispatchMode::Inline);
    }
}
