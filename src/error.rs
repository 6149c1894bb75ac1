// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed error kinds for the connected-agent plane.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("session expired, please log in again")]
    SessionExpired,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_yaml::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Outcome of a handshake attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("server rejected protocol version: {0}")]
    Incompatible(String),
    #[error("deauthorized, re-login")]
    AuthFailed,
    #[error("handshake timed out waiting for server response")]
    Timeout,
    #[error("connection closed before handshake response")]
    ConnectionClosed,
    #[error("unexpected message type during handshake: {0}")]
    Protocol(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Transport-level transient failures. All are retried by the caller with
/// backoff; none are meant to be fatal on their own.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("connection is closed")]
    Closed,
}

/// Rate limiter decision carrying a retry hint.
#[derive(Debug, Error)]
#[error("rate limited, retry after {retry_after:?}")]
pub struct RateLimited {
    pub retry_after: Duration,
}

/// Error classification for a single loop iteration.
///
/// All four kinds share one type so callers can apply the retry policy
/// uniformly; only the remediation hint differs by provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("{provider} binary not found: {hint}")]
    MissingBinary { provider: String, hint: String },
    #[error("{provider} run timed out: {hint}")]
    Timeout { provider: String, hint: String },
    #[error("{provider} exited with code {code}: {stderr}")]
    NonZeroExit { provider: String, code: i32, stderr: String, hint: String },
    #[error("{provider} process failed: {cause}")]
    ProcessFailed { provider: String, cause: String, hint: String },
}

impl ExecutionError {
    /// Whether the retry policy should retry this failure rather than
    /// transition the loop instance straight to `Failed`.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::MissingBinary { .. } => false,
            ExecutionError::Timeout { .. } => true,
            ExecutionError::NonZeroExit { .. } => false,
            ExecutionError::ProcessFailed { .. } => true,
        }
    }

    pub fn hint(&self) -> &str {
        match self {
            ExecutionError::MissingBinary { hint, .. }
            | ExecutionError::Timeout { hint, .. }
            | ExecutionError::NonZeroExit { hint, .. }
            | ExecutionError::ProcessFailed { hint, .. } => hint,
        }
    }
}

/// Error envelope codes exposed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    AuthFailed,
    ProjectNotFound,
    PrdNotFound,
    RunAlreadyActive,
    RunNotActive,
    SessionNotFound,
    CloneFailed,
    QuotaExhausted,
    FilesystemError,
    ClaudeError,
    UpdateFailed,
    IncompatibleVersion,
    RateLimited,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::PrdNotFound => "PRD_NOT_FOUND",
            Self::RunAlreadyActive => "RUN_ALREADY_ACTIVE",
            Self::RunNotActive => "RUN_NOT_ACTIVE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::CloneFailed => "CLONE_FAILED",
            Self::QuotaExhausted => "QUOTA_EXHAUSTED",
            Self::FilesystemError => "FILESYSTEM_ERROR",
            Self::ClaudeError => "CLAUDE_ERROR",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::IncompatibleVersion => "INCOMPATIBLE_VERSION",
            Self::RateLimited => "RATE_LIMITED",
        }
    }
}
