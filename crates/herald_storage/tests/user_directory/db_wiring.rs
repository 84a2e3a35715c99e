#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Utc};
use herald_kernel_contracts::directory::{
    DeliveryHour, Pseudonym, SubscriptionState, UserId, UserRecord,
};
use herald_storage::directory::{StorageError, UserDirectoryStore};
use herald_storage::repo::{SubscriptionLedgerRepo, UserDirectoryRepo};

fn pseudonym(fill: char) -> Pseudonym {
    Pseudonym::from_digest_hex(fill.to_string().repeat(64)).unwrap()
}

fn hour(h: u8) -> DeliveryHour {
    DeliveryHour::new(h).unwrap()
}

fn temp_dir(name: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    std::env::temp_dir().join(format!("herald-directory-test-{name}-{suffix}"))
}

fn seeded_store() -> UserDirectoryStore {
    let now = Utc::now();
    let mut store = UserDirectoryStore::new();
    store
        .insert_user_row(
            UserRecord::v1(UserId(1), pseudonym('1'), SubscriptionState::Active)
                .with_channel_ciphertext("ZW52ZWxvcGUtb25l")
                .with_preferred_hour(hour(8))
                .with_partner(pseudonym('2')),
        )
        .unwrap();
    store
        .insert_user_row(
            UserRecord::v1(UserId(2), pseudonym('2'), SubscriptionState::Trial)
                .with_channel_ciphertext("ZW52ZWxvcGUtdHdv")
                .with_trial_expires_at(now + Duration::days(2))
                .with_preferred_hour(hour(8)),
        )
        .unwrap();
    store
        .insert_user_row(
            UserRecord::v1(UserId(3), pseudonym('3'), SubscriptionState::Active)
                .with_channel_ciphertext("ZW52ZWxvcGUtdGhyZWU=")
                .with_subscription_ends_at(now - Duration::hours(1))
                .with_preferred_hour(hour(9)),
        )
        .unwrap();
    store
        .insert_user_row(
            UserRecord::v1(UserId(4), pseudonym('4'), SubscriptionState::Active)
                .with_channel_ciphertext("ZW52ZWxvcGUtZm91cg=="),
        )
        .unwrap();
    store
}

#[test]
fn at_directory_wiring_01_select_eligible_matches_hour_and_requires_preference() {
    let store = seeded_store();
    let now = Utc::now();
    let mut ids: Vec<UserId> = store
        .select_eligible(hour(8), now)
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec![UserId(1), UserId(2)]);

    // User 4 has no preferred hour and is never selected.
    for h in 0..=DeliveryHour::MAX {
        assert!(store
            .select_eligible(hour(h), now)
            .unwrap()
            .iter()
            .all(|u| u.id != UserId(4)));
    }
    assert!(store.select_eligible(hour(3), now).unwrap().is_empty());
}

#[test]
fn at_directory_wiring_02_find_by_pseudonym_hits_and_misses() {
    let store = seeded_store();
    let partner = store.find_by_pseudonym(&pseudonym('2')).unwrap().unwrap();
    assert_eq!(partner.id, UserId(2));
    assert!(store.find_by_pseudonym(&pseudonym('f')).unwrap().is_none());
}

#[test]
fn at_directory_wiring_03_lifecycle_selections_and_state_write() {
    let mut store = seeded_store();
    let now = Utc::now();
    let ended = store.select_subscriptions_ended(now).unwrap();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].id, UserId(3));

    let trials = store.select_trials_ending(now, Duration::days(3)).unwrap();
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0].id, UserId(2));
    assert!(store.select_trials_ended(now).unwrap().is_empty());

    store
        .set_subscription_state(UserId(3), SubscriptionState::Expired)
        .unwrap();
    assert_eq!(
        store.get_user_row(UserId(3)).unwrap().subscription_state,
        SubscriptionState::Expired
    );
    assert!(store.select_subscriptions_ended(now).unwrap().is_empty());
}

#[test]
fn at_directory_wiring_04_json_snapshot_roundtrip() {
    let base = temp_dir("roundtrip");
    let path = base.join("directory.json");
    let store = seeded_store();
    store.save_json(&path).unwrap();

    let reloaded = UserDirectoryStore::load_json(&path).unwrap();
    assert_eq!(reloaded.len(), store.len());
    assert_eq!(
        reloaded.get_user_row(UserId(1)),
        store.get_user_row(UserId(1))
    );

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"schema_version\": 1"));
    assert!(raw.contains("ZW52ZWxvcGUtb25l"));
    fs::remove_dir_all(base).unwrap();
}

#[test]
fn at_directory_wiring_05_unknown_schema_and_invalid_rows_fail_closed() {
    let base = temp_dir("schema");
    fs::create_dir_all(&base).unwrap();
    let path = base.join("directory.json");

    fs::write(&path, r#"{"schema_version": 9, "users": []}"#).unwrap();
    assert!(matches!(
        UserDirectoryStore::load_json(&path),
        Err(StorageError::SchemaVersion { got: 9 })
    ));

    let bad_hour = format!(
        r#"{{"schema_version": 1, "users": [{{"id": 1, "pseudonym": "{}", "subscription_state": "active", "preferred_hour": 24}}]}}"#,
        "a".repeat(64)
    );
    fs::write(&path, bad_hour).unwrap();
    assert!(matches!(
        UserDirectoryStore::load_json(&path),
        Err(StorageError::Json(_))
    ));

    assert!(matches!(
        UserDirectoryStore::load_json(&base.join("missing.json")),
        Err(StorageError::Io(_))
    ));
    fs::remove_dir_all(base).unwrap();
}
