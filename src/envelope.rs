// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three-field envelope wrapping every control-plane message.
//!
//! Business payload fields beyond the envelope are explicitly external
//! vocabulary, so inbound messages are only decoded as far as
//! [`EnvelopeMeta`] here; full payload decoding is left to whatever
//! handler the caller registers with the [`crate::dispatch::Dispatcher`],
//! using the retained raw bytes. Outbound messages constructed from data
//! this spec *does* define concretely (project summaries, PRD
//! descriptors, manager events) get typed wrappers.
//!
//! Grounded on `crates/cli/src/transport/ws_msg.rs`'s tagged-enum wire
//! types and `crates/mux/src/upstream/bridge.rs::stamp_request_id`'s
//! technique of editing a parsed JSON object in place.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server→client request types. Inbound to this agent.
pub mod inbound_type {
    pub const LIST_PROJECTS: &str = "list_projects";
    pub const GET_PROJECT: &str = "get_project";
    pub const GET_PRD: &str = "get_prd";
    pub const GET_PRDS: &str = "get_prds";
    pub const NEW_PRD: &str = "new_prd";
    pub const PRD_MESSAGE: &str = "prd_message";
    pub const CLOSE_PRD_SESSION: &str = "close_prd_session";
    pub const START_RUN: &str = "start_run";
    pub const PAUSE_RUN: &str = "pause_run";
    pub const RESUME_RUN: &str = "resume_run";
    pub const STOP_RUN: &str = "stop_run";
    pub const CLONE_REPO: &str = "clone_repo";
    pub const CREATE_PROJECT: &str = "create_project";
    pub const GET_DIFF: &str = "get_diff";
    pub const GET_DIFFS: &str = "get_diffs";
    pub const GET_LOGS: &str = "get_logs";
    pub const GET_SETTINGS: &str = "get_settings";
    pub const UPDATE_SETTINGS: &str = "update_settings";
    pub const TRIGGER_UPDATE: &str = "trigger_update";
    pub const PING: &str = "ping";

    pub const ALL: &[&str] = &[
        LIST_PROJECTS,
        GET_PROJECT,
        GET_PRD,
        GET_PRDS,
        NEW_PRD,
        PRD_MESSAGE,
        CLOSE_PRD_SESSION,
        START_RUN,
        PAUSE_RUN,
        RESUME_RUN,
        STOP_RUN,
        CLONE_REPO,
        CREATE_PROJECT,
        GET_DIFF,
        GET_DIFFS,
        GET_LOGS,
        GET_SETTINGS,
        UPDATE_SETTINGS,
        TRIGGER_UPDATE,
        PING,
    ];
}

/// Client→server emission types. Outbound from this agent.
pub mod outbound_type {
    pub const STATE_SNAPSHOT: &str = "state_snapshot";
    pub const PROJECT_LIST: &str = "project_list";
    pub const PROJECT_STATE: &str = "project_state";
    pub const PRD_CONTENT: &str = "prd_content";
    pub const CLAUDE_OUTPUT: &str = "claude_output";
    pub const PRD_OUTPUT: &str = "prd_output";
    pub const RUN_PROGRESS: &str = "run_progress";
    pub const RUN_COMPLETE: &str = "run_complete";
    pub const RUN_PAUSED: &str = "run_paused";
    pub const DIFF: &str = "diff";
    pub const CLONE_PROGRESS: &str = "clone_progress";
    pub const CLONE_COMPLETE: &str = "clone_complete";
    pub const ERROR: &str = "error";
    pub const QUOTA_EXHAUSTED: &str = "quota_exhausted";
    pub const LOG_LINES: &str = "log_lines";
    pub const SESSION_TIMEOUT_WARNING: &str = "session_timeout_warning";
    pub const SESSION_EXPIRED: &str = "session_expired";
    pub const SETTINGS: &str = "settings";
    pub const UPDATE_AVAILABLE: &str = "update_available";
    pub const PONG: &str = "pong";
}

/// Handshake-only envelope types.
pub mod handshake_type {
    pub const HELLO: &str = "hello";
    pub const WELCOME: &str = "welcome";
    pub const INCOMPATIBLE: &str = "incompatible";
    pub const AUTH_FAILED: &str = "auth_failed";
}

/// The three universal fields every envelope carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl EnvelopeMeta {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: Uuid::new_v4(), timestamp: Utc::now() }
    }
}

/// A decoded inbound envelope: the universal fields plus the original
/// bytes, so a handler can decode its own type-specific payload shape.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub meta: EnvelopeMeta,
    pub raw: Bytes,
}

impl InboundEnvelope {
    /// Parse only the universal fields out of a raw frame. Malformed
    /// frames (not even valid envelopes) are the caller's responsibility
    /// to log and skip.
    pub fn parse(raw: Bytes) -> Result<Self, serde_json::Error> {
        let meta: EnvelopeMeta = serde_json::from_slice(&raw)?;
        Ok(Self { meta, raw })
    }

    /// Decode the full type-specific payload from the retained raw bytes.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.raw)
    }
}

/// An outbound envelope: universal fields flattened together with a
/// concrete, spec-defined payload.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope<T: Serialize> {
    #[serde(flatten)]
    pub meta: EnvelopeMeta,
    #[serde(flatten)]
    pub payload: T,
}

impl<T: Serialize> OutboundEnvelope<T> {
    pub fn new(kind: impl Into<String>, payload: T) -> Self {
        Self { meta: EnvelopeMeta::new(kind), payload }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One outbound message queued by the Scanner, Watcher, or Engine fan-out
/// for the agent root's forwarder task to hand to `Transport::send`.
/// Decouples those producers from holding a `Transport` reference
/// directly: boundary handlers marshal outputs to this frame type and
/// leave the actual send to the forwarder.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl OutboundFrame {
    pub fn new(kind: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            kind: kind.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Shared sink type producers enqueue [`OutboundFrame`]s into.
pub type Outbox = tokio::sync::mpsc::Sender<OutboundFrame>;

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
