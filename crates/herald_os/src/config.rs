#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use herald_kernel_contracts::directory::DeliveryHour;
use thiserror::Error;

pub const ENV_TIMEZONE: &str = "HERALD_TIMEZONE";
pub const ENV_LIFECYCLE_HOUR: &str = "HERALD_LIFECYCLE_HOUR";
pub const ENV_LIFECYCLE_WARNING_DAYS: &str = "HERALD_LIFECYCLE_WARNING_DAYS";
pub const ENV_DIRECTORY_PATH: &str = "HERALD_DIRECTORY_PATH";

const MAX_WARNING_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchConfigError {
    #[error("unknown IANA time zone: {0}")]
    InvalidTimezone(String),
    #[error("HERALD_LIFECYCLE_HOUR must be an integer in [0, 23]")]
    InvalidLifecycleHour,
    #[error("HERALD_LIFECYCLE_WARNING_DAYS must be an integer in [1, 30]")]
    InvalidWarningDays,
}

/// Scheduling knobs shared by the CLI and the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub timezone: Tz,
    pub lifecycle_hour: DeliveryHour,
    pub warning_window_days: u32,
    pub directory_path: Option<PathBuf>,
}

impl DispatchConfig {
    pub fn mvp_v1() -> Self {
        Self {
            timezone: chrono_tz::Asia::Tehran,
            lifecycle_hour: DeliveryHour::from_clock_hour(9),
            warning_window_days: 3,
            directory_path: None,
        }
    }

    pub fn from_env() -> Result<Self, DispatchConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, DispatchConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::mvp_v1();
        if let Some(raw) = lookup(ENV_TIMEZONE).filter(|v| !v.trim().is_empty()) {
            let name = raw.trim();
            config.timezone = name
                .parse::<Tz>()
                .map_err(|_| DispatchConfigError::InvalidTimezone(name.to_string()))?;
        }
        if let Some(raw) = lookup(ENV_LIFECYCLE_HOUR) {
            config.lifecycle_hour = raw
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(|hour| DeliveryHour::new(hour).ok())
                .ok_or(DispatchConfigError::InvalidLifecycleHour)?;
        }
        if let Some(raw) = lookup(ENV_LIFECYCLE_WARNING_DAYS) {
            config.warning_window_days = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|days| (1..=MAX_WARNING_DAYS).contains(days))
                .ok_or(DispatchConfigError::InvalidWarningDays)?;
        }
        config.directory_path = lookup(ENV_DIRECTORY_PATH)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    pub fn warning_window(&self) -> Duration {
        Duration::days(i64::from(self.warning_window_days))
    }

    pub fn clock(&self) -> DispatchClock {
        DispatchClock::new(self.timezone)
    }
}

/// Maps UTC instants onto the wall clock users pick their hour on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchClock {
    timezone: Tz,
}

impl DispatchClock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn local_hour(&self, now: DateTime<Utc>) -> DeliveryHour {
        DeliveryHour::from_clock_hour(now.with_timezone(&self.timezone).hour())
    }

    /// Time left until the next local top of the hour. Zones with a
    /// half-hour offset tick at :30 UTC.
    pub fn until_next_hour(&self, now: DateTime<Utc>) -> std::time::Duration {
        let local = now.with_timezone(&self.timezone);
        let elapsed_ms = u64::from(local.minute()) * 60_000
            + u64::from(local.second()) * 1_000
            + u64::from(local.nanosecond() / 1_000_000).min(999);
        std::time::Duration::from_millis(3_600_000 - elapsed_ms)
    }
}
