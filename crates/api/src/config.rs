use axum::http::HeaderValue;
use genq_core::requeue::RequeuePolicy;
use genq_pipeline::config::{parse_or, process_env, required, requeue_policy};
use genq_pipeline::ConfigError;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<HeaderValue>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub database_url: String,
    /// When set, enqueue requests naming a template that is not in this
    /// directory are rejected up front.
    pub templates_dir: Option<String>,
    /// Policy applied by the admin requeue endpoints.
    pub requeue: RequeuePolicy,
    pub json_logs: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `HOST`                 | `0.0.0.0`               |
    /// | `PORT`                 | `3000`                  |
    /// | `CORS_ORIGINS`         | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `DATABASE_URL`         | (required)              |
    /// | `TEMPLATES_DIR`        | unset (no check)        |
    /// | `LOG_FORMAT`           | `text` (or `json`)      |
    ///
    /// plus the `REQUEUE_*` variables read by
    /// [`genq_pipeline::config::requeue_policy`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_origins: String =
            parse_or(lookup, "CORS_ORIGINS", "http://localhost:5173".to_string())?;
        let cors_origins = raw_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                    key: "CORS_ORIGINS",
                    value: origin.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_format: String = parse_or(lookup, "LOG_FORMAT", "text".to_string())?;

        Ok(Self {
            host: parse_or(lookup, "HOST", "0.0.0.0".to_string())?,
            port: parse_or(lookup, "PORT", 3000)?,
            cors_origins,
            request_timeout_secs: parse_or(lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            database_url: required(lookup, "DATABASE_URL")?,
            templates_dir: lookup("TEMPLATES_DIR").filter(|v| !v.trim().is_empty()),
            requeue: requeue_policy(lookup)?,
            json_logs: log_format.eq_ignore_ascii_case("json"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::from_lookup(&env(&[("DATABASE_URL", "postgres://q")])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.cors_origins, vec![HeaderValue::from_static("http://localhost:5173")]);
        assert!(config.templates_dir.is_none());
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = ServerConfig::from_lookup(&env(&[
            ("DATABASE_URL", "postgres://q"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
        ]))
        .unwrap();
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.cors_origins[1], "http://b.test");
    }

    #[test]
    fn invalid_port_is_an_error() {
        assert_matches!(
            ServerConfig::from_lookup(&env(&[("DATABASE_URL", "postgres://q"), ("PORT", "70000")])),
            Err(ConfigError::Invalid { key: "PORT", .. })
        );
    }
}
