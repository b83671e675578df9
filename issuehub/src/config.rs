//! Configuration Management
//!
//! Configuration values are read from environment variables with sensible defaults.
//!
//! ## Configuration Variables
//!
//! - `ISSUEHUB_DATABASE_URL`: SQLite database URL (default: `sqlite://issuehub.db`)
//! - `ISSUEHUB_BIND_ADDRESS`: HTTP server bind address (default: `0.0.0.0:3002`)
//! - `ISSUEHUB_SESSION_COOKIE`: Name of the session cookie (default: `issuehub_session`)
//! - `ISSUEHUB_REMEMBER_ME_DAYS`: Lifetime of a "remember me" login, `1..=3650` (default: `30`)
//! - `ISSUEHUB_SESSION_HOURS`: Server-side lifetime of any other login, `1..=8760` (default: `24`)
//! - `ISSUEHUB_SEED_DEFAULTS`: Insert default statuses and categories on startup (default: `true`)

use std::{env, ops::RangeInclusive};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub session_cookie: String,
    pub remember_me_days: i64,
    pub session_hours: i64,
    pub seed_defaults: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://issuehub.db".to_string(),
            bind_address: "0.0.0.0:3002".to_string(),
            session_cookie: "issuehub_session".to_string(),
            remember_me_days: 30,
            session_hours: 24,
            seed_defaults: true,
        }
    }
}

impl Config {
    /// Defaults overlaid with whatever `ISSUEHUB_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ISSUEHUB_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(address) = lookup("ISSUEHUB_BIND_ADDRESS") {
            config.bind_address = address;
        }
        if let Some(cookie) = lookup("ISSUEHUB_SESSION_COOKIE") {
            config.session_cookie = cookie;
        }
        if let Some(days) = lookup("ISSUEHUB_REMEMBER_ME_DAYS") {
            config.remember_me_days = parse_in_range("ISSUEHUB_REMEMBER_ME_DAYS", &days, 1..=3650)?;
        }
        if let Some(hours) = lookup("ISSUEHUB_SESSION_HOURS") {
            config.session_hours = parse_in_range("ISSUEHUB_SESSION_HOURS", &hours, 1..=8760)?;
        }
        if let Some(seed) = lookup("ISSUEHUB_SEED_DEFAULTS") {
            config.seed_defaults = parse_bool(&seed).ok_or_else(|| ConfigError::InvalidValue {
                key: "ISSUEHUB_SEED_DEFAULTS",
                value: seed.clone(),
                reason: "expected true/false".to_string(),
            })?;
        }

        Ok(config)
    }
}

fn parse_in_range(
    key: &'static str,
    value: &str,
    range: RangeInclusive<i64>,
) -> Result<i64, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    };
    let number: i64 = value.trim().parse::<i64>().map_err(|e| invalid(e.to_string()))?;
    if !range.contains(&number) {
        return Err(invalid(format!(
            "expected {}..={}",
            range.start(),
            range.end()
        )));
    }
    Ok(number)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
