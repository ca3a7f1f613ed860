use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Browser acquisition mode, see the Browser Pool component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserMode {
    Local,
    Cloud,
}

impl FromStr for BrowserMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            other => anyhow::bail!("unknown browser mode '{other}' (expected local|cloud)"),
        }
    }
}

impl BrowserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

/// Process-wide runtime configuration, loaded once from the environment.
///
/// Mirrors the env-driven resolver idiom used elsewhere in this codebase
/// rather than a config-file parser: every field has a typed default and is
/// overridable by a single environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_concurrent_sessions: usize,
    pub max_steps_per_session: u32,
    pub study_timeout_seconds: u64,
    pub per_action_timeout_ms: u64,
    pub action_retries: u32,
    pub browser_mode_default: BrowserModeSetting,
    pub failover_cooldown_seconds: u64,
    pub live_state_ttl_seconds: u64,
    pub browser_acquire_deadline_seconds: u64,
    pub data_dir: PathBuf,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserModeSetting {
    Local,
    Cloud,
}

impl Config {
    /// Loads configuration from the environment, falling back to documented
    /// defaults for every option that is unset.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_concurrent_sessions: env_parse_or("MAX_CONCURRENT_SESSIONS", 5)?,
            max_steps_per_session: env_parse_or("MAX_STEPS_PER_SESSION", 30)?,
            study_timeout_seconds: env_parse_or("STUDY_TIMEOUT_SECONDS", 600)?,
            per_action_timeout_ms: env_parse_or("PER_ACTION_TIMEOUT_MS", 15_000)?,
            action_retries: env_parse_or("ACTION_RETRIES", 1)?,
            browser_mode_default: match env::var("BROWSER_MODE_DEFAULT") {
                Ok(value) if value.trim().eq_ignore_ascii_case("cloud") => {
                    BrowserModeSetting::Cloud
                }
                _ => BrowserModeSetting::Local,
            },
            failover_cooldown_seconds: env_parse_or("FAILOVER_COOLDOWN_SECONDS", 300)?,
            live_state_ttl_seconds: env_parse_or("LIVE_STATE_TTL_SECONDS", 21_600)?,
            browser_acquire_deadline_seconds: env_parse_or(
                "BROWSER_ACQUIRE_DEADLINE_SECONDS",
                120,
            )?,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}
