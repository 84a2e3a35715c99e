#![forbid(unsafe_code)]

use std::env;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use herald_engines::cipher_config::{CipherConfig, CipherConfigError};
use herald_engines::envelope::EnvelopeCipher;
use herald_engines::telegram::{TelegramChannel, TelegramConfig, TelegramConfigError};
use herald_kernel_contracts::directory::DeliveryHour;
use herald_kernel_contracts::dispatch::RunSummary;
use herald_kernel_contracts::lifecycle::LifecycleSummary;
use herald_os::config::{DispatchConfig, DispatchConfigError};
use herald_os::delivery::{ChannelDelivery, DeliveryChannel, StaticContentBuilder};
use herald_os::dispatch::ShutdownSignal;
use herald_os::tick::{TickError, TickRunner};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

pub const ENV_HEALTH_BIND: &str = "HERALD_HEALTH_BIND";
const DEFAULT_HEALTH_BIND: &str = "127.0.0.1:8089";

#[derive(Debug, Error)]
pub enum SchedulerConfigError {
    #[error(transparent)]
    Cipher(#[from] CipherConfigError),
    #[error(transparent)]
    Telegram(#[from] TelegramConfigError),
    #[error(transparent)]
    Dispatch(#[from] DispatchConfigError),
    #[error(transparent)]
    Tick(#[from] TickError),
}

/// Health endpoint bind address, or `None` when set to `off`.
pub fn health_bind_from_env() -> Option<String> {
    match env::var(ENV_HEALTH_BIND) {
        Ok(v) if matches!(v.trim().to_ascii_lowercase().as_str(), "" | "0" | "off" | "false") => {
            None
        }
        Ok(v) => Some(v.trim().to_string()),
        Err(_) => Some(DEFAULT_HEALTH_BIND.to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerCounters {
    pub ticks_total: u64,
    pub aborted_total: u64,
    pub lifecycle_runs_total: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_hour: Option<u8>,
    pub last_run: Option<RunSummary>,
    pub last_lifecycle: Option<LifecycleSummary>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerHealthResponse {
    pub status: String,
    pub outcome: String,
    pub counters: SchedulerCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub hour: u8,
    pub dispatch: RunSummary,
    pub lifecycle: Option<LifecycleSummary>,
}

/// Everything one hourly tick needs, shared between the timer loop and the
/// health endpoint.
pub struct SchedulerRuntime<C>
where
    C: DeliveryChannel,
{
    runner: TickRunner,
    delivery: ChannelDelivery<StaticContentBuilder, C>,
    shutdown: ShutdownSignal,
    counters: Mutex<SchedulerCounters>,
}

impl SchedulerRuntime<TelegramChannel> {
    pub fn default_from_env() -> Result<Self, SchedulerConfigError> {
        let cipher = EnvelopeCipher::new(&CipherConfig::from_env()?);
        let runner = TickRunner::new(cipher, DispatchConfig::from_env()?)?;
        let channel = TelegramChannel::new(&TelegramConfig::from_env()?)?;
        Ok(Self::new(
            runner,
            ChannelDelivery::new(StaticContentBuilder::from_env(), channel),
        ))
    }
}

impl<C> SchedulerRuntime<C>
where
    C: DeliveryChannel,
{
    pub fn new(runner: TickRunner, delivery: ChannelDelivery<StaticContentBuilder, C>) -> Self {
        Self {
            runner,
            delivery,
            shutdown: ShutdownSignal::new(),
            counters: Mutex::new(SchedulerCounters::default()),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn until_next_tick(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.runner.config().clock().until_next_hour(now)
    }

    /// Dispatch for the current local hour, then the lifecycle sweep when
    /// this is the configured lifecycle hour.
    pub fn run_tick(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let hour = self.runner.config().clock().local_hour(now);
        let result = self.run_tick_inner(hour, now);
        self.record(now, hour.get(), &result);
        result
    }

    fn run_tick_inner(
        &self,
        hour: DeliveryHour,
        now: DateTime<Utc>,
    ) -> Result<TickReport, TickError> {
        let dispatch = self
            .runner
            .dispatch(&self.delivery, hour, now, self.shutdown.clone())?;
        let lifecycle = if self.runner.is_lifecycle_hour(hour) && !self.shutdown.is_requested() {
            Some(
                self.runner
                    .lifecycle(self.delivery.channel(), now, self.shutdown.clone())?,
            )
        } else {
            None
        };
        Ok(TickReport {
            hour: hour.get(),
            dispatch,
            lifecycle,
        })
    }

    fn record(&self, now: DateTime<Utc>, hour: u8, result: &Result<TickReport, TickError>) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.ticks_total += 1;
        counters.last_tick_at = Some(now);
        counters.last_hour = Some(hour);
        match result {
            Ok(report) => {
                counters.last_run = Some(report.dispatch);
                if let Some(lifecycle) = report.lifecycle {
                    counters.lifecycle_runs_total += 1;
                    counters.last_lifecycle = Some(lifecycle);
                }
                counters.last_error = None;
                info!(hour, summary = %report.dispatch, "scheduler tick finished");
            }
            Err(err) => {
                counters.aborted_total += 1;
                counters.last_error = Some(err.to_string());
                error!(hour, error = %err, "scheduler tick aborted");
            }
        }
    }

    pub fn health_report(&self) -> SchedulerHealthResponse {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let outcome = if counters.last_error.is_some() {
            "DEGRADED"
        } else {
            "HEALTHY"
        };
        SchedulerHealthResponse {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use herald_engines::cipher_config::{CipherAlgorithm, KEY_LEN};
    use herald_engines::pseudonym::PseudonymHasher;
    use herald_kernel_contracts::directory::{SubscriptionState, UserId, UserRecord};
    use herald_kernel_contracts::dispatch::{ChannelAddress, DeliveryError};
    use herald_storage::directory::UserDirectoryStore;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<i64>>,
    }

    impl DeliveryChannel for Outbox {
        fn send_text(&self, address: &ChannelAddress, _text: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(address.expose());
            Ok(())
        }
    }

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(&CipherConfig::from_key_bytes(
            CipherAlgorithm::Aes256Gcm,
            [66u8; KEY_LEN],
        ))
    }

    fn temp_path(label: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(1);
        std::env::temp_dir()
            .join(format!("herald-scheduler-test-{label}-{suffix}"))
            .join("users.json")
    }

    fn runtime(path: PathBuf) -> SchedulerRuntime<Outbox> {
        SchedulerRuntime::new(
            TickRunner::with_directory_path(cipher(), DispatchConfig::mvp_v1(), path),
            ChannelDelivery::new(StaticContentBuilder::mvp_v1(), Outbox::default()),
        )
    }

    #[test]
    fn at_scheduler_01_tick_dispatches_local_hour_and_sweeps_at_lifecycle_hour() {
        let cipher = cipher();
        // 05:30 UTC is 09:00 in Tehran, the default lifecycle hour.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 5, 30, 0).unwrap();
        let path = temp_path("tick");
        let mut store = UserDirectoryStore::new();
        store
            .insert_user_row(
                UserRecord::v1(
                    UserId(1),
                    PseudonymHasher::new().hash("tg-1"),
                    SubscriptionState::Active,
                )
                .with_channel_ciphertext(cipher.encrypt("3001").unwrap())
                .with_preferred_hour(DeliveryHour::new(9).unwrap()),
            )
            .unwrap();
        store
            .insert_user_row(
                UserRecord::v1(
                    UserId(2),
                    PseudonymHasher::new().hash("tg-2"),
                    SubscriptionState::Trial,
                )
                .with_channel_ciphertext(cipher.encrypt("3002").unwrap())
                .with_trial_expires_at(now + Duration::days(2)),
            )
            .unwrap();
        store.save_json(&path).unwrap();

        let runtime = runtime(path.clone());
        let report = runtime.run_tick(now).unwrap();
        assert_eq!(report.hour, 9);
        assert_eq!(report.dispatch.processed, 1);
        assert_eq!(report.lifecycle.map(|l| l.trials_ending.notified), Some(1));

        let health = runtime.health_report();
        assert_eq!(health.outcome, "HEALTHY");
        assert_eq!(health.counters.ticks_total, 1);
        assert_eq!(health.counters.lifecycle_runs_total, 1);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn at_scheduler_02_aborted_tick_marks_health_degraded() {
        let runtime = runtime(temp_path("missing"));
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(runtime.run_tick(now).is_err());

        let health = runtime.health_report();
        assert_eq!(health.outcome, "DEGRADED");
        assert_eq!(health.counters.aborted_total, 1);
        assert_eq!(
            health.counters.last_error.as_deref(),
            Some("user directory unavailable")
        );
    }

    #[test]
    fn at_scheduler_03_shutdown_leaves_recipients_unvisited_and_skips_sweep() {
        let cipher = cipher();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 5, 30, 0).unwrap();
        let path = temp_path("shutdown");
        let mut store = UserDirectoryStore::new();
        for id in 1..=2u64 {
            store
                .insert_user_row(
                    UserRecord::v1(
                        UserId(id),
                        PseudonymHasher::new().hash(&format!("tg-{id}")),
                        SubscriptionState::Active,
                    )
                    .with_channel_ciphertext(cipher.encrypt("4000").unwrap())
                    .with_preferred_hour(DeliveryHour::new(9).unwrap()),
                )
                .unwrap();
        }
        store.save_json(&path).unwrap();

        let runtime = runtime(path.clone());
        runtime.shutdown_signal().request();
        let report = runtime.run_tick(now).unwrap();
        assert_eq!(report.dispatch.eligible, 2);
        assert_eq!(report.dispatch.not_attempted, 2);
        assert!(report.lifecycle.is_none());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn at_scheduler_04_next_tick_follows_local_top_of_hour() {
        let runtime = runtime(temp_path("align"));
        assert_eq!(
            runtime.until_next_tick(Utc.with_ymd_and_hms(2026, 3, 1, 5, 0, 0).unwrap()),
            std::time::Duration::from_secs(30 * 60)
        );
    }
}
