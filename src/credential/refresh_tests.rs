// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use super::*;

fn expiring_record() -> CredentialRecord {
    CredentialRecord {
        access_token: "old-access".to_owned(),
        refresh_token: "old-refresh".to_owned(),
        expires_at: Utc::now() + chrono::Duration::seconds(120),
        device_name: "lap".to_owned(),
        user: "u@x".to_owned(),
    }
}

/// Start a mock OAuth token endpoint that counts hits and always succeeds.
async fn spawn_mock_token_server() -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let state = Arc::clone(&hits);

    async fn handler(State(hits): State<Arc<AtomicU32>>) -> Json<serde_json::Value> {
        hits.fetch_add(1, Ordering::SeqCst);
        Json(serde_json::json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 3600,
        }))
    }

    let app = Router::new().route("/api/oauth/token", post(handler)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

#[tokio::test]
async fn refresh_coalesces_concurrent_callers_into_one_request() {
    let (base_url, hits) = spawn_mock_token_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    store.save(&expiring_record()).unwrap();

    let coordinator = Arc::new(RefreshCoordinator::new(
        store,
        "/api/oauth/token".to_owned(),
        "/api/oauth/revoke".to_owned(),
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let coordinator = Arc::clone(&coordinator);
        let base_url = base_url.clone();
        handles.push(tokio::spawn(async move { coordinator.refresh(&base_url).await.unwrap() }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1, "expected exactly one token endpoint hit");
    for r in &results {
        assert_eq!(r.access_token, "new-access");
        assert_eq!(r.refresh_token, "new-refresh");
    }
}

#[tokio::test]
async fn refresh_skips_network_call_when_not_near_expiry() {
    let (base_url, hits) = spawn_mock_token_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    let mut fresh = expiring_record();
    fresh.expires_at = Utc::now() + chrono::Duration::hours(1);
    store.save(&fresh).unwrap();

    let coordinator = RefreshCoordinator::new(
        store,
        "/api/oauth/token".to_owned(),
        "/api/oauth/revoke".to_owned(),
    );

    let result = coordinator.refresh(&base_url).await.unwrap();
    assert_eq!(result.access_token, "old-access");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_fails_with_session_expired_on_error_response() {
    let hits = Arc::new(AtomicU32::new(0));
    async fn err_handler() -> Json<serde_json::Value> {
        Json(serde_json::json!({ "error": "invalid_grant" }))
    }
    let app = Router::new().route("/api/oauth/token", post(err_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let _ = &hits;

    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.yaml"));
    store.save(&expiring_record()).unwrap();
    let coordinator = RefreshCoordinator::new(
        store,
        "/api/oauth/token".to_owned(),
        "/api/oauth/revoke".to_owned(),
    );

    let result = coordinator.refresh(&format!("http://{addr}")).await;
    assert!(matches!(result, Err(CredentialError::SessionExpired)));
}
