#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use herald_engines::envelope::EnvelopeCipher;
use herald_kernel_contracts::directory::DeliveryHour;
use herald_kernel_contracts::dispatch::RunSummary;
use herald_kernel_contracts::lifecycle::LifecycleSummary;
use herald_storage::directory::UserDirectoryStore;
use herald_storage::repo::StorageError;
use thiserror::Error;
use tracing::{error, info};

use crate::config::DispatchConfig;
use crate::delivery::{DeliveryChannel, RecipientDelivery};
use crate::dispatch::{DispatchError, DispatchLoop, ShutdownSignal};
use crate::lifecycle::LifecycleSweep;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("HERALD_DIRECTORY_PATH is not configured")]
    DirectoryPathMissing,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("user directory snapshot could not be saved")]
    Persist(#[source] StorageError),
}

/// Runs one dispatch or lifecycle tick against a fresh snapshot of the
/// directory file.
#[derive(Debug)]
pub struct TickRunner {
    cipher: EnvelopeCipher,
    config: DispatchConfig,
    directory_path: PathBuf,
}

impl TickRunner {
    pub fn new(cipher: EnvelopeCipher, config: DispatchConfig) -> Result<Self, TickError> {
        let directory_path = config
            .directory_path
            .clone()
            .ok_or(TickError::DirectoryPathMissing)?;
        Ok(Self::with_directory_path(cipher, config, directory_path))
    }

    pub fn with_directory_path(
        cipher: EnvelopeCipher,
        config: DispatchConfig,
        directory_path: PathBuf,
    ) -> Self {
        Self {
            cipher,
            config,
            directory_path,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn directory_path(&self) -> &Path {
        &self.directory_path
    }

    pub fn is_lifecycle_hour(&self, hour: DeliveryHour) -> bool {
        hour == self.config.lifecycle_hour
    }

    fn load_directory(&self) -> Result<UserDirectoryStore, DispatchError> {
        UserDirectoryStore::load_json(&self.directory_path).map_err(|err| {
            error!(error = %err, "user directory snapshot could not be loaded");
            DispatchError::DirectoryUnavailable(err)
        })
    }

    pub fn dispatch<R>(
        &self,
        delivery: &R,
        hour: DeliveryHour,
        now: DateTime<Utc>,
        shutdown: ShutdownSignal,
    ) -> Result<RunSummary, TickError>
    where
        R: RecipientDelivery + ?Sized,
    {
        let directory = self.load_directory()?;
        let summary = DispatchLoop::new(&directory, &self.cipher, delivery, shutdown).run(hour, now)?;
        Ok(summary)
    }

    /// Sweeps and writes the snapshot back when any state changed.
    pub fn lifecycle<C>(
        &self,
        channel: &C,
        now: DateTime<Utc>,
        shutdown: ShutdownSignal,
    ) -> Result<LifecycleSummary, TickError>
    where
        C: DeliveryChannel + ?Sized,
    {
        let mut directory = self.load_directory()?;
        let summary = LifecycleSweep::new(
            &self.cipher,
            channel,
            self.config.warning_window(),
            shutdown,
        )
        .run(&mut directory, now)?;

        let transitioned =
            summary.subscriptions_expired.transitioned + summary.trials_expired.transitioned;
        if transitioned > 0 {
            directory
                .save_json(&self.directory_path)
                .map_err(TickError::Persist)?;
            info!(transitioned, "user directory snapshot saved");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use herald_engines::cipher_config::{CipherAlgorithm, CipherConfig, KEY_LEN};
    use herald_engines::pseudonym::PseudonymHasher;
    use herald_kernel_contracts::directory::{SubscriptionState, UserId, UserRecord};
    use herald_kernel_contracts::dispatch::{ChannelAddress, DeliveryError};
    use std::cell::RefCell;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(&CipherConfig::from_key_bytes(
            CipherAlgorithm::Aes256Gcm,
            [55u8; KEY_LEN],
        ))
    }

    fn temp_path(label: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(1);
        std::env::temp_dir()
            .join(format!("herald-tick-test-{label}-{suffix}"))
            .join("users.json")
    }

    #[derive(Default)]
    struct Outbox {
        sent: RefCell<Vec<i64>>,
    }

    impl DeliveryChannel for Outbox {
        fn send_text(&self, address: &ChannelAddress, _text: &str) -> Result<(), DeliveryError> {
            self.sent.borrow_mut().push(address.expose());
            Ok(())
        }
    }

    #[test]
    fn at_tick_01_missing_directory_path_is_rejected() {
        assert!(matches!(
            TickRunner::new(cipher(), DispatchConfig::mvp_v1()),
            Err(TickError::DirectoryPathMissing)
        ));
    }

    #[test]
    fn at_tick_02_missing_snapshot_aborts_dispatch() {
        let runner = TickRunner::with_directory_path(
            cipher(),
            DispatchConfig::mvp_v1(),
            temp_path("absent"),
        );
        let delivery = crate::delivery::ChannelDelivery::new(
            crate::delivery::StaticContentBuilder::mvp_v1(),
            Outbox::default(),
        );
        let err = runner
            .dispatch(
                &delivery,
                DeliveryHour::new(9).unwrap(),
                Utc::now(),
                ShutdownSignal::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            TickError::Dispatch(DispatchError::DirectoryUnavailable(_))
        ));
    }

    #[test]
    fn at_tick_03_lifecycle_persists_transitions() {
        let cipher = cipher();
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap();
        let path = temp_path("lifecycle");
        let mut store = UserDirectoryStore::new();
        store
            .insert_user_row(
                UserRecord::v1(
                    UserId(1),
                    PseudonymHasher::new().hash("tg-1"),
                    SubscriptionState::Trial,
                )
                .with_channel_ciphertext(cipher.encrypt("5001").unwrap())
                .with_trial_expires_at(now - Duration::days(1)),
            )
            .unwrap();
        store.save_json(&path).unwrap();

        let runner = TickRunner::with_directory_path(cipher, DispatchConfig::mvp_v1(), path.clone());
        let outbox = Outbox::default();
        let summary = runner.lifecycle(&outbox, now, ShutdownSignal::new()).unwrap();
        assert_eq!(summary.trials_expired.transitioned, 1);
        assert_eq!(*outbox.sent.borrow(), vec![5001]);

        let reloaded = UserDirectoryStore::load_json(&path).unwrap();
        assert_eq!(
            reloaded.get_user_row(UserId(1)).unwrap().subscription_state,
            SubscriptionState::Expired
        );
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn at_tick_04_lifecycle_hour_matches_config() {
        let runner = TickRunner::with_directory_path(
            cipher(),
            DispatchConfig::mvp_v1(),
            temp_path("hour"),
        );
        assert!(runner.is_lifecycle_hour(DeliveryHour::new(9).unwrap()));
        assert!(!runner.is_lifecycle_hour(DeliveryHour::new(10).unwrap()));
    }
}
