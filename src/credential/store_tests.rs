// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;

use chrono::TimeZone;

use super::*;

fn sample_record() -> CredentialRecord {
    CredentialRecord {
        access_token: "a".to_owned(),
        refresh_token: "r".to_owned(),
        expires_at: Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap(),
        device_name: "lap".to_owned(),
        user: "u@x".to_owned(),
    }
}

#[test]
fn load_on_empty_dir_is_not_logged_in() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    match store.load() {
        Err(CredentialError::NotLoggedIn) => {}
        other => panic!("expected NotLoggedIn, got {other:?}"),
    }
}

#[test]
fn save_then_load_round_trips_and_sets_file_mode() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    let record = sample_record();

    store.save(&record).unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(loaded, record);

    let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn save_is_atomic_no_temp_file_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    store.save(&sample_record()).unwrap();

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["credentials.yaml".to_owned()]);
}

#[test]
fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    store.delete().unwrap();
    store.save(&sample_record()).unwrap();
    store.delete().unwrap();
    store.delete().unwrap();
    assert!(matches!(store.load(), Err(CredentialError::NotLoggedIn)));
}

#[test]
fn is_expired_and_near_expiry_predicates() {
    let mut record = sample_record();
    let now = Utc::now();
    record.expires_at = now - chrono::Duration::seconds(1);
    assert!(record.is_expired_at(now));

    record.expires_at = now + chrono::Duration::seconds(60);
    assert!(!record.is_expired_at(now));
    assert!(record.is_near_expiry_at(now, std::time::Duration::from_secs(5 * 60)));

    record.expires_at = now + chrono::Duration::seconds(3600);
    assert!(!record.is_near_expiry_at(now, std::time::Duration::from_secs(5 * 60)));
}
