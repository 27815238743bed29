//! Environment parsing shared by the worker and API binaries.
//!
//! Values are read through a lookup function instead of `std::env`
//! directly so configuration can be tested without touching process
//! state.

use std::str::FromStr;
use std::time::Duration;

use genq_core::requeue::RequeuePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Read a variable from the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Required string variable.
pub fn required(lookup: &dyn Fn(&str) -> Option<String>, key: &'static str) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

/// Optional variable parsed with `FromStr`, falling back to `default`.
pub fn parse_or<T>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

/// Requeue policy from `REQUEUE_*` variables.
///
/// | Env Var                  | Default |
/// |--------------------------|---------|
/// | `REQUEUE_MAX_AGE_HOURS`  | `24`    |
/// | `REQUEUE_MAX_RETRIES`    | `3`     |
/// | `REQUEUE_PRIORITY_BOOST` | `true`  |
/// | `REQUEUE_DELAY_SECS`     | `5`     |
pub fn requeue_policy(lookup: &dyn Fn(&str) -> Option<String>) -> Result<RequeuePolicy, ConfigError> {
    let defaults = RequeuePolicy::default();
    let max_age_hours: u64 = parse_or(lookup, "REQUEUE_MAX_AGE_HOURS", defaults.max_age.as_secs() / 3600)?;
    Ok(RequeuePolicy {
        max_age: Duration::from_secs(max_age_hours * 3600),
        max_retries: parse_or(lookup, "REQUEUE_MAX_RETRIES", defaults.max_retries)?,
        priority_boost: parse_or(lookup, "REQUEUE_PRIORITY_BOOST", defaults.priority_boost)?,
        delay_before_requeue: Duration::from_secs(parse_or(
            lookup,
            "REQUEUE_DELAY_SECS",
            defaults.delay_before_requeue.as_secs(),
        )?),
    })
}
