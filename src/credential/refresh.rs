// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized token refresh and revocation.
//!
//! Grounded on `crates/mux/src/credential/refresh.rs`'s `do_refresh`
//! request shape and `crates/mux/src/transport/ws.rs`'s
//! check-lock-recheck pattern (there used for bridge creation, here for
//! collapsing concurrent refreshers onto a single network call).

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::credential::store::{CredentialRecord, CredentialStore, NEAR_EXPIRY_MARGIN};
use crate::error::CredentialError;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

/// Process-wide serialization point for credential refresh.
///
/// A genuine singleton in the source system, modeled here as an explicit
/// value owned by the agent root and passed to every caller, never a
/// module-level static.
pub struct RefreshCoordinator {
    store: CredentialStore,
    lock: Mutex<()>,
    http: reqwest::Client,
    oauth_token_path: String,
    oauth_revoke_path: String,
}

impl RefreshCoordinator {
    pub fn new(store: CredentialStore, oauth_token_path: String, oauth_revoke_path: String) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            http: reqwest::Client::builder()
                .timeout(REFRESH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            oauth_token_path,
            oauth_revoke_path,
        }
    }

    /// Refresh the credential record if it is within `NEAR_EXPIRY_MARGIN`
    /// of expiry, else return the unchanged record.
    ///
    /// Concurrent callers collapse onto one network call: each acquires
    /// `lock` in turn, and every caller after the first sees a record that
    /// is no longer near expiry and returns immediately without a request.
    pub async fn refresh(&self, base_url: &str) -> Result<CredentialRecord, CredentialError> {
        let _guard = self.lock.lock().await;

        let record = self.store.load()?;
        if !record.is_near_expiry_at(chrono::Utc::now(), NEAR_EXPIRY_MARGIN) {
            return Ok(record);
        }

        let url = format!("{}{}", base_url.trim_end_matches('/'), self.oauth_token_path);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": record.refresh_token,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CredentialError::SessionExpired);
        }

        let body: TokenResponse = resp.json().await?;
        if body.error.is_some() {
            return Err(CredentialError::SessionExpired);
        }
        let access_token = match body.access_token {
            Some(t) => t,
            None => return Err(CredentialError::SessionExpired),
        };

        let mut updated = record;
        updated.access_token = access_token;
        if let Some(rt) = body.refresh_token.filter(|rt| !rt.is_empty()) {
            updated.refresh_token = rt;
        }
        updated.expires_at =
            chrono::Utc::now() + chrono::Duration::seconds(body.expires_in.unwrap_or(0) as i64);

        self.store.save(&updated)?;
        Ok(updated)
    }

    /// Best-effort revocation. Non-2xx is surfaced as an error; the caller
    /// decides whether to still delete the local record.
    pub async fn revoke(&self, access_token: &str, base_url: &str) -> Result<(), CredentialError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.oauth_revoke_path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CredentialError::SessionExpired);
        }
        Ok(())
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
