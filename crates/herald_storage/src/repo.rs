#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use herald_kernel_contracts::directory::{
    DeliveryHour, Pseudonym, SubscriptionState, UserId, UserRecord,
};

pub use crate::directory::StorageError;

/// Read side of the user directory used by the dispatch loop.
pub trait UserDirectoryRepo {
    /// Snapshot of rows matching the selection predicate for this tick.
    /// Order is unspecified.
    fn select_eligible(
        &self,
        hour: DeliveryHour,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserRecord>, StorageError>;

    fn find_by_pseudonym(&self, pseudonym: &Pseudonym) -> Result<Option<UserRecord>, StorageError>;
}

/// Subscription lifecycle queries and the one write the sweep performs.
pub trait SubscriptionLedgerRepo: UserDirectoryRepo {
    fn select_subscriptions_ended(&self, now: DateTime<Utc>)
        -> Result<Vec<UserRecord>, StorageError>;

    fn select_subscriptions_ending(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<UserRecord>, StorageError>;

    fn select_trials_ended(&self, now: DateTime<Utc>) -> Result<Vec<UserRecord>, StorageError>;

    fn select_trials_ending(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<UserRecord>, StorageError>;

    fn set_subscription_state(
        &mut self,
        user_id: UserId,
        state: SubscriptionState,
    ) -> Result<(), StorageError>;
}
