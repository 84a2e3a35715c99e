#![forbid(unsafe_code)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_engines::envelope::EnvelopeCipher;
use herald_kernel_contracts::directory::{DeliveryHour, UserRecord};
use herald_kernel_contracts::dispatch::{DeliveryError, RunSummary};
use herald_storage::repo::{StorageError, UserDirectoryRepo};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::delivery::RecipientDelivery;
use crate::eligibility::EligibilitySelector;
use crate::resolver::RecipientResolver;

/// Structural failure that aborts a whole run. Per-recipient problems never
/// surface here.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("user directory unavailable")]
    DirectoryUnavailable(#[source] StorageError),
}

/// Cooperative stop flag, checked between recipients.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientOutcome {
    Processed,
    Skipped,
    Failed,
}

/// Runs `attempt` behind a panic boundary. A panic becomes
/// `DeliveryError::Panicked`.
pub(crate) fn isolate<F>(attempt: F) -> Result<(), DeliveryError>
where
    F: FnOnce() -> Result<(), DeliveryError>,
{
    panic::catch_unwind(AssertUnwindSafe(attempt)).unwrap_or(Err(DeliveryError::Panicked))
}

pub struct DispatchLoop<'a, D, R>
where
    D: UserDirectoryRepo + ?Sized,
    R: RecipientDelivery + ?Sized,
{
    directory: &'a D,
    resolver: RecipientResolver<'a>,
    delivery: &'a R,
    shutdown: ShutdownSignal,
}

impl<'a, D, R> DispatchLoop<'a, D, R>
where
    D: UserDirectoryRepo + ?Sized,
    R: RecipientDelivery + ?Sized,
{
    pub fn new(
        directory: &'a D,
        cipher: &'a EnvelopeCipher,
        delivery: &'a R,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            directory,
            resolver: RecipientResolver::new(cipher),
            delivery,
            shutdown,
        }
    }

    /// One pass over everyone due at `hour`. Returns `Err` only when the
    /// directory cannot produce the eligible set.
    pub fn run(&self, hour: DeliveryHour, now: DateTime<Utc>) -> Result<RunSummary, DispatchError> {
        let eligible = EligibilitySelector::new(self.directory).select(hour, now)?;
        let mut summary = RunSummary {
            eligible: eligible.len(),
            ..RunSummary::default()
        };

        for (index, user) in eligible.iter().enumerate() {
            if self.shutdown.is_requested() {
                summary.not_attempted = eligible.len() - index;
                warn!(
                    not_attempted = summary.not_attempted,
                    "shutdown requested; stopping dispatch between recipients"
                );
                break;
            }
            match self.dispatch_one(user) {
                RecipientOutcome::Processed => summary.processed += 1,
                RecipientOutcome::Skipped => summary.skipped += 1,
                RecipientOutcome::Failed => summary.failed += 1,
            }
        }

        info!(
            hour = hour.get(),
            eligible = summary.eligible,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            not_attempted = summary.not_attempted,
            "dispatch run finished"
        );
        Ok(summary)
    }

    fn dispatch_one(&self, user: &UserRecord) -> RecipientOutcome {
        let recipient = match self.resolver.resolve(self.directory, user) {
            Ok(recipient) => recipient,
            Err(err) => {
                warn!(user_id = %user.id, reason = err.reason.as_str(), "recipient skipped");
                return RecipientOutcome::Skipped;
            }
        };

        let outcome = isolate(|| self.delivery.deliver(&recipient));
        drop(recipient);

        match outcome {
            Ok(()) => {
                debug!(user_id = %user.id, "recipient processed");
                RecipientOutcome::Processed
            }
            Err(err) => {
                warn!(
                    user_id = %user.id,
                    kind = err.kind(),
                    error = %err,
                    "recipient delivery failed"
                );
                RecipientOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use herald_engines::cipher_config::{CipherAlgorithm, CipherConfig, KEY_LEN};
    use herald_engines::pseudonym::PseudonymHasher;
    use herald_kernel_contracts::directory::{Pseudonym, SubscriptionState, UserId};
    use herald_kernel_contracts::dispatch::ResolvedRecipient;
    use herald_storage::directory::UserDirectoryStore;
    use std::cell::RefCell;

    fn cipher() -> EnvelopeCipher {
        EnvelopeCipher::new(&CipherConfig::from_key_bytes(
            CipherAlgorithm::Aes256Gcm,
            [33u8; KEY_LEN],
        ))
    }

    fn hour() -> DeliveryHour {
        DeliveryHour::new(14).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 10, 30, 0).unwrap()
    }

    fn user(id: u64) -> UserRecord {
        UserRecord::v1(
            UserId(id),
            PseudonymHasher::new().hash(&format!("tg-{id}")),
            SubscriptionState::Active,
        )
        .with_preferred_hour(hour())
    }

    /// Stand-in collaborator: records every delivery and fails or panics for
    /// configured addresses.
    #[derive(Default)]
    struct ScriptedDelivery {
        delivered: RefCell<Vec<UserId>>,
        fail_for: Vec<i64>,
        panic_for: Vec<i64>,
        stop_after_first: Option<ShutdownSignal>,
    }

    impl RecipientDelivery for ScriptedDelivery {
        fn deliver(&self, recipient: &ResolvedRecipient) -> Result<(), DeliveryError> {
            if let Some(signal) = &self.stop_after_first {
                signal.request();
            }
            let address = recipient.channel_address().expose();
            if self.panic_for.contains(&address) {
                panic!("collaborator bug");
            }
            if self.fail_for.contains(&address) {
                return Err(DeliveryError::Timeout);
            }
            self.delivered.borrow_mut().push(recipient.user_id());
            Ok(())
        }
    }

    struct UnavailableDirectory;

    impl UserDirectoryRepo for UnavailableDirectory {
        fn select_eligible(
            &self,
            _hour: DeliveryHour,
            _now: DateTime<Utc>,
        ) -> Result<Vec<UserRecord>, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        fn find_by_pseudonym(&self, _pseudonym: &Pseudonym) -> Result<Option<UserRecord>, StorageError> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn at_dispatch_01_fault_isolation_across_three_users() {
        let cipher = cipher();
        let mut store = UserDirectoryStore::new();
        store
            .insert_user_row(user(1).with_channel_ciphertext(cipher.encrypt("1001").unwrap()))
            .unwrap();
        // Well-formed base64 that fails authentication.
        store
            .insert_user_row(user(2).with_channel_ciphertext("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"))
            .unwrap();
        store
            .insert_user_row(user(3).with_channel_ciphertext(cipher.encrypt("1003").unwrap()))
            .unwrap();

        let delivery = ScriptedDelivery {
            fail_for: vec![1003],
            ..ScriptedDelivery::default()
        };
        let summary = DispatchLoop::new(&store, &cipher, &delivery, ShutdownSignal::new())
            .run(hour(), now())
            .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                eligible: 3,
                processed: 1,
                skipped: 1,
                failed: 1,
                not_attempted: 0,
            }
        );
        assert_eq!(*delivery.delivered.borrow(), vec![UserId(1)]);
    }

    #[test]
    fn at_dispatch_02_collaborator_panic_counts_as_failed() {
        let cipher = cipher();
        let mut store = UserDirectoryStore::new();
        for (id, chat) in [(1, "11"), (2, "22"), (3, "33")] {
            store
                .insert_user_row(user(id).with_channel_ciphertext(cipher.encrypt(chat).unwrap()))
                .unwrap();
        }
        let delivery = ScriptedDelivery {
            panic_for: vec![22],
            ..ScriptedDelivery::default()
        };
        let summary = DispatchLoop::new(&store, &cipher, &delivery, ShutdownSignal::new())
            .run(hour(), now())
            .unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(*delivery.delivered.borrow(), vec![UserId(1), UserId(3)]);
    }

    #[test]
    fn at_dispatch_03_shutdown_stops_between_recipients() {
        let cipher = cipher();
        let mut store = UserDirectoryStore::new();
        for id in 1..=4 {
            store
                .insert_user_row(
                    user(id).with_channel_ciphertext(cipher.encrypt(&id.to_string()).unwrap()),
                )
                .unwrap();
        }
        let shutdown = ShutdownSignal::new();
        let delivery = ScriptedDelivery {
            stop_after_first: Some(shutdown.clone()),
            ..ScriptedDelivery::default()
        };
        let summary = DispatchLoop::new(&store, &cipher, &delivery, shutdown)
            .run(hour(), now())
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.not_attempted, 3);
        assert_eq!(summary.attempted() + summary.not_attempted, summary.eligible);
    }

    #[test]
    fn at_dispatch_04_directory_unavailable_aborts_run() {
        let cipher = cipher();
        let delivery = ScriptedDelivery::default();
        let err = DispatchLoop::new(&UnavailableDirectory, &cipher, &delivery, ShutdownSignal::new())
            .run(hour(), now())
            .unwrap_err();
        assert!(matches!(err, DispatchError::DirectoryUnavailable(_)));
        assert!(delivery.delivered.borrow().is_empty());
    }

    #[test]
    fn at_dispatch_05_empty_selection_is_a_clean_run() {
        let cipher = cipher();
        let store = UserDirectoryStore::new();
        let delivery = ScriptedDelivery::default();
        let summary = DispatchLoop::new(&store, &cipher, &delivery, ShutdownSignal::new())
            .run(hour(), now())
            .unwrap();
        assert_eq!(summary, RunSummary::default());
    }
}
