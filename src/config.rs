// Engine configuration. Everything is a plain parameter with a documented
// default; `from_env` overlays process environment for deployments that
// configure through it.

use crate::policy::PolicyConfig;
use crate::retry::RetryConfig;
use crate::store::StoreConfig;
use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Supplier hold window; holds lapse this many seconds after creation.
    pub hold_ttl_seconds: u64,
    pub store: StoreConfig,
    pub retry: RetryConfig,
    pub policy: PolicyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: 30 * 60,
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the environment on top of the defaults.
    /// Unset variables keep their default; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            hold_ttl_seconds: env_or("HOLD_TTL_SECONDS", defaults.hold_ttl_seconds)?,
            store: StoreConfig {
                max_entries: env_or("STORE_MAX_ENTRIES", defaults.store.max_entries)?,
                sweep_interval_seconds: env_or(
                    "STORE_SWEEP_INTERVAL_SECONDS",
                    defaults.store.sweep_interval_seconds,
                )?,
                sweep_grace_seconds: env_or(
                    "STORE_SWEEP_GRACE_SECONDS",
                    defaults.store.sweep_grace_seconds,
                )?,
            },
            retry: RetryConfig {
                max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                initial_backoff_ms: env_or(
                    "RETRY_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff_ms,
                )?,
                max_backoff_ms: env_or("RETRY_MAX_BACKOFF_MS", defaults.retry.max_backoff_ms)?,
                backoff_multiplier: env_or(
                    "RETRY_BACKOFF_MULTIPLIER",
                    defaults.retry.backoff_multiplier,
                )?,
                jitter_factor: env_or("RETRY_JITTER_FACTOR", defaults.retry.jitter_factor)?,
            },
            policy: PolicyConfig {
                full_refund_days: env_or("REFUND_FULL_DAYS", defaults.policy.full_refund_days)?,
                half_refund_days: env_or("REFUND_HALF_DAYS", defaults.policy.half_refund_days)?,
                quarter_refund_days: env_or(
                    "REFUND_QUARTER_DAYS",
                    defaults.policy.quarter_refund_days,
                )?,
            },
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(error) => Err(error).with_context(|| format!("cannot read {key}")),
    }
}
