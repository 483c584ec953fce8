//! Fulfillment configuration structures.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Reassignment scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay between offering a booking to one mechanic and the next check.
    pub reassign_interval_secs: u64,
    /// Delay before retrying after a storage failure or an exhausted cycle.
    pub retry_delay_secs: u64,
    /// Delay used for bookings found overdue at startup.
    pub overdue_grace_secs: u64,
    /// How long shutdown waits for each in-flight check.
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reassign_interval_secs: 3600,
            retry_delay_secs: 120,
            overdue_grace_secs: 120,
            shutdown_timeout_secs: 2,
        }
    }
}

impl SchedulerConfig {
    /// Long interval between reassignment checks.
    #[must_use]
    pub const fn reassign_interval(&self) -> Duration {
        Duration::from_secs(self.reassign_interval_secs)
    }

    /// Short retry delay.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Delay for overdue bookings at startup.
    #[must_use]
    pub const fn overdue_grace(&self) -> Duration {
        Duration::from_secs(self.overdue_grace_secs)
    }

    /// Per-task join timeout at shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate timing values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.reassign_interval_secs == 0 {
            return Err("reassign_interval_secs must be greater than 0".into());
        }
        if self.retry_delay_secs == 0 {
            return Err("retry_delay_secs must be greater than 0".into());
        }
        if self.retry_delay_secs > self.reassign_interval_secs {
            return Err("retry_delay_secs must not exceed reassign_interval_secs".into());
        }
        Ok(())
    }
}

/// Capacity estimator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Number of days, starting tomorrow, examined by default.
    pub window_days: u32,
    /// Upper bound on each upstream fetch.
    pub fetch_timeout_secs: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            fetch_timeout_secs: 10,
        }
    }
}

impl EstimatorConfig {
    /// Upper bound on each upstream fetch.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Validate estimator values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.window_days == 0 {
            return Err("window_days must be greater than 0".into());
        }
        if self.window_days > 366 {
            return Err("window_days must not exceed 366".into());
        }
        if self.fetch_timeout_secs == 0 {
            return Err("fetch_timeout_secs must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    /// Scheduler timing.
    pub scheduler: SchedulerConfig,
    /// Estimator settings.
    pub estimator: EstimatorConfig,
    /// Maximum audit events kept in memory; zero disables the audit trail.
    pub audit_capacity: usize,
}

impl FulfillmentConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a message prefixed with the failing section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler: {e}"))?;
        self.estimator
            .validate()
            .map_err(|e| format!("estimator: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading `.env` first when
    /// present. Unset variables keep their defaults.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `DISPATCH_REASSIGN_INTERVAL_SECS` | `scheduler.reassign_interval_secs` |
    /// | `DISPATCH_RETRY_DELAY_SECS` | `scheduler.retry_delay_secs` |
    /// | `DISPATCH_OVERDUE_GRACE_SECS` | `scheduler.overdue_grace_secs` |
    /// | `DISPATCH_SHUTDOWN_TIMEOUT_SECS` | `scheduler.shutdown_timeout_secs` |
    /// | `DISPATCH_WINDOW_DAYS` | `estimator.window_days` |
    /// | `DISPATCH_FETCH_TIMEOUT_SECS` | `estimator.fetch_timeout_secs` |
    /// | `DISPATCH_AUDIT_CAPACITY` | `audit_capacity` |
    ///
    /// # Errors
    ///
    /// Fails when a variable is not a number or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Fails when a value is not a number or the result is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            slot: &mut T,
        ) -> AppResult<()>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            if let Some(raw) = lookup(key) {
                *slot = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} is not a valid number: `{raw}`"))?;
            }
            Ok(())
        }

        let mut cfg = Self::default();
        read(&lookup, "DISPATCH_REASSIGN_INTERVAL_SECS", &mut cfg.scheduler.reassign_interval_secs)?;
        read(&lookup, "DISPATCH_RETRY_DELAY_SECS", &mut cfg.scheduler.retry_delay_secs)?;
        read(&lookup, "DISPATCH_OVERDUE_GRACE_SECS", &mut cfg.scheduler.overdue_grace_secs)?;
        read(&lookup, "DISPATCH_SHUTDOWN_TIMEOUT_SECS", &mut cfg.scheduler.shutdown_timeout_secs)?;
        read(&lookup, "DISPATCH_WINDOW_DAYS", &mut cfg.estimator.window_days)?;
        read(&lookup, "DISPATCH_FETCH_TIMEOUT_SECS", &mut cfg.estimator.fetch_timeout_secs)?;
        read(&lookup, "DISPATCH_AUDIT_CAPACITY", &mut cfg.audit_capacity)?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}
