#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use herald_kernel_contracts::directory::{
    DeliveryHour, Pseudonym, SubscriptionState, UserId, UserRecord,
};
use herald_kernel_contracts::{ContractViolation, Validate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::repo::{SubscriptionLedgerRepo, UserDirectoryRepo};

const DIRECTORY_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
    #[error("{table} row not found for user {user_id}")]
    NotFound { table: &'static str, user_id: UserId },
    #[error("duplicate {table} key for user {user_id}")]
    DuplicateKey { table: &'static str, user_id: UserId },
    #[error("unsupported directory schema version {got}")]
    SchemaVersion { got: u8 },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct DirectoryDocument {
    schema_version: u8,
    users: Vec<UserRecord>,
}

/// In-memory user directory with a pseudonym index. Backed by a JSON
/// snapshot on disk that only ever holds envelopes and digests.
#[derive(Debug, Clone, Default)]
pub struct UserDirectoryStore {
    users: BTreeMap<UserId, UserRecord>,
    pseudonym_index: BTreeMap<Pseudonym, UserId>,
}

impl UserDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user_row(&mut self, record: UserRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.users.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey {
                table: "users",
                user_id: record.id,
            });
        }
        if self.pseudonym_index.contains_key(&record.pseudonym) {
            return Err(StorageError::DuplicateKey {
                table: "users.pseudonym",
                user_id: record.id,
            });
        }
        self.pseudonym_index
            .insert(record.pseudonym.clone(), record.id);
        self.users.insert(record.id, record);
        Ok(())
    }

    pub fn get_user_row(&self, id: UserId) -> Option<&UserRecord> {
        self.users.get(&id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn load_json(path: &Path) -> Result<Self, StorageError> {
        let raw = fs::read_to_string(path)?;
        let mut store = Self::new();
        if raw.trim().is_empty() {
            return Ok(store);
        }
        let doc = serde_json::from_str::<DirectoryDocument>(&raw)?;
        if doc.schema_version != DIRECTORY_SCHEMA_VERSION {
            return Err(StorageError::SchemaVersion {
                got: doc.schema_version,
            });
        }
        for record in doc.users {
            store.insert_user_row(record)?;
        }
        debug!(rows = store.len(), "user directory snapshot loaded");
        Ok(store)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let doc = DirectoryDocument {
            schema_version: DIRECTORY_SCHEMA_VERSION,
            users: self.users.values().cloned().collect(),
        };
        let serialized = serde_json::to_vec_pretty(&doc)?;
        atomic_write(path, &serialized)?;
        Ok(())
    }

    fn select_where<F>(&self, predicate: F) -> Vec<UserRecord>
    where
        F: Fn(&UserRecord) -> bool,
    {
        self.users
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }
}

impl UserDirectoryRepo for UserDirectoryStore {
    fn select_eligible(
        &self,
        hour: DeliveryHour,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserRecord>, StorageError> {
        Ok(self.select_where(|record| record.is_eligible_at(hour, now)))
    }

    fn find_by_pseudonym(&self, pseudonym: &Pseudonym) -> Result<Option<UserRecord>, StorageError> {
        Ok(self
            .pseudonym_index
            .get(pseudonym)
            .and_then(|id| self.users.get(id))
            .cloned())
    }
}

impl SubscriptionLedgerRepo for UserDirectoryStore {
    fn select_subscriptions_ended(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserRecord>, StorageError> {
        Ok(self.select_where(|record| record.subscription_ended(now)))
    }

    fn select_subscriptions_ending(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<UserRecord>, StorageError> {
        Ok(self.select_where(|record| record.subscription_ending_within(now, window)))
    }

    fn select_trials_ended(&self, now: DateTime<Utc>) -> Result<Vec<UserRecord>, StorageError> {
        Ok(self.select_where(|record| record.trial_ended(now)))
    }

    fn select_trials_ending(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<UserRecord>, StorageError> {
        Ok(self.select_where(|record| record.trial_ending_within(now, window)))
    }

    fn set_subscription_state(
        &mut self,
        user_id: UserId,
        state: SubscriptionState,
    ) -> Result<(), StorageError> {
        let record = self.users.get_mut(&user_id).ok_or(StorageError::NotFound {
            table: "users",
            user_id,
        })?;
        record.subscription_state = state;
        Ok(())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}
