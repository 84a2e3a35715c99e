#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use herald_kernel_contracts::directory::{DeliveryHour, UserRecord};
use herald_storage::repo::UserDirectoryRepo;
use tracing::{debug, error};

use crate::dispatch::DispatchError;

/// Picks the users due at `hour`: live subscription (active, or a trial that
/// has not lapsed), a stored channel ciphertext, and a preferred hour equal
/// to `hour`. A missing preferred hour never matches.
#[derive(Debug)]
pub struct EligibilitySelector<'a, D>
where
    D: UserDirectoryRepo + ?Sized,
{
    directory: &'a D,
}

impl<'a, D> EligibilitySelector<'a, D>
where
    D: UserDirectoryRepo + ?Sized,
{
    pub fn new(directory: &'a D) -> Self {
        Self { directory }
    }

    pub fn select(
        &self,
        hour: DeliveryHour,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserRecord>, DispatchError> {
        match self.directory.select_eligible(hour, now) {
            Ok(users) => {
                debug!(hour = hour.get(), eligible = users.len(), "eligible users selected");
                Ok(users)
            }
            Err(err) => {
                error!(hour = hour.get(), error = %err, "user directory selection failed");
                Err(DispatchError::DirectoryUnavailable(err))
            }
        }
    }
}
