use std::time::Duration;

use genq_core::requeue::RequeuePolicy;
use genq_pipeline::config::{parse_or, process_env, required, requeue_policy};
use genq_pipeline::poller::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_MAX_ATTEMPTS};
use genq_pipeline::worker::{DEFAULT_CONCURRENCY, DEFAULT_IDLE_INTERVAL};
use genq_pipeline::{ConfigError, PollConfig};

const DEFAULT_COMFYUI_URL: &str = "http://localhost:8188";
const DEFAULT_TEMPLATES_DIR: &str = "./templates";
const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 300;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub comfyui_url: String,
    pub templates_dir: String,
    pub concurrency: usize,
    pub poll: PollConfig,
    pub idle_interval: Duration,
    /// `None` disables the periodic requeue sweep.
    pub requeue_interval: Option<Duration>,
    pub requeue: RequeuePolicy,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `DATABASE_URL`           | (required)              |
    /// | `COMFYUI_URL`            | `http://localhost:8188` |
    /// | `TEMPLATES_DIR`          | `./templates`           |
    /// | `WORKER_CONCURRENCY`     | `3`                     |
    /// | `POLL_INTERVAL_SECS`     | `5`                     |
    /// | `POLL_MAX_ATTEMPTS`      | `120`                   |
    /// | `IDLE_INTERVAL_MS`       | `1000`                  |
    /// | `REQUEUE_INTERVAL_SECS`  | `300` (`0` disables)    |
    /// | `LOG_FORMAT`             | `text` (or `json`)      |
    ///
    /// The `REQUEUE_*` policy variables are documented on
    /// [`genq_pipeline::config::requeue_policy`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let concurrency: usize = parse_or(lookup, "WORKER_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".into(),
                reason: "at least one worker slot is required".into(),
            });
        }

        let poll = PollConfig {
            interval: Duration::from_secs(parse_or(
                lookup,
                "POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL.as_secs(),
            )?),
            max_attempts: parse_or(lookup, "POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS)?,
        };

        let requeue_secs: u64 =
            parse_or(lookup, "REQUEUE_INTERVAL_SECS", DEFAULT_REQUEUE_INTERVAL_SECS)?;
        let log_format: String = parse_or(lookup, "LOG_FORMAT", "text".to_string())?;

        Ok(Self {
            database_url: required(lookup, "DATABASE_URL")?,
            comfyui_url: parse_or(lookup, "COMFYUI_URL", DEFAULT_COMFYUI_URL.to_string())?,
            templates_dir: parse_or(lookup, "TEMPLATES_DIR", DEFAULT_TEMPLATES_DIR.to_string())?,
            concurrency,
            poll,
            idle_interval: Duration::from_millis(parse_or(
                lookup,
                "IDLE_INTERVAL_MS",
                DEFAULT_IDLE_INTERVAL.as_millis() as u64,
            )?),
            requeue_interval: (requeue_secs > 0).then(|| Duration::from_secs(requeue_secs)),
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
        let config = WorkerConfig::from_lookup(&env(&[("DATABASE_URL", "postgres://q")])).unwrap();
        assert_eq!(config.comfyui_url, "http://localhost:8188");
        assert_eq!(config.templates_dir, "./templates");
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.poll, PollConfig::default());
        assert_eq!(config.idle_interval, Duration::from_secs(1));
        assert_eq!(config.requeue_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.requeue, RequeuePolicy::default());
        assert!(!config.json_logs);
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(
            WorkerConfig::from_lookup(&env(&[])),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn zero_requeue_interval_disables_sweep() {
        let config = WorkerConfig::from_lookup(&env(&[
            ("DATABASE_URL", "postgres://q"),
            ("REQUEUE_INTERVAL_SECS", "0"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.requeue_interval, None);
        assert!(config.json_logs);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert_matches!(
            WorkerConfig::from_lookup(&env(&[
                ("DATABASE_URL", "postgres://q"),
                ("WORKER_CONCURRENCY", "0"),
            ])),
            Err(ConfigError::Invalid { key: "WORKER_CONCURRENCY", .. })
        );
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert_matches!(
            WorkerConfig::from_lookup(&env(&[
                ("DATABASE_URL", "postgres://q"),
                ("POLL_MAX_ATTEMPTS", "-1"),
            ])),
            Err(ConfigError::Invalid { key: "POLL_MAX_ATTEMPTS", .. })
        );
    }
}
