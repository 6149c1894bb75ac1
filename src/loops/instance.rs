// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry entry and state machine for a single named loop.

use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of a [`LoopInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Retry behavior applied to transient execution failures: `timeout` and
/// `process_failed` are retried, `missing_binary` and `non_zero_exit` are
/// not.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff: Duration::from_secs(5) }
    }
}

/// Failed `Start`/`Pause` transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("start is only valid from Ready, Paused, Completed, or Failed")]
    InvalidStart,
    #[error("pause is only valid while Running")]
    InvalidPause,
}

/// One registered loop: its PRD target, optional execution isolation,
/// and current state-machine position.
#[derive(Debug, Clone)]
pub struct LoopInstance {
    pub name: String,
    pub prd_path: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub branch: Option<String>,
    pub state: LoopState,
    pub iteration: u32,
    pub max_iterations: u32,
    pub retry_policy: RetryPolicy,
    pub retries_used: u32,
}

impl LoopInstance {
    pub fn new(
        name: impl Into<String>,
        prd_path: PathBuf,
        working_dir: Option<PathBuf>,
        branch: Option<String>,
        max_iterations: u32,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            prd_path,
            working_dir,
            branch,
            state: LoopState::Ready,
            iteration: 0,
            max_iterations,
            retry_policy,
            retries_used: 0,
        }
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.state, LoopState::Ready | LoopState::Paused | LoopState::Completed | LoopState::Failed) {
            return Err(TransitionError::InvalidStart);
        }
        self.state = LoopState::Running;
        self.retries_used = 0;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), TransitionError> {
        if self.state != LoopState::Running {
            return Err(TransitionError::InvalidPause);
        }
        self.state = LoopState::Paused;
        Ok(())
    }

    /// Stop is idempotent from any state and always yields a terminal
    /// state.
    pub fn stop(&mut self) {
        self.state = match self.state {
            LoopState::Completed => LoopState::Completed,
            _ => LoopState::Failed,
        };
    }

    pub fn mark_completed(&mut self) {
        self.state = LoopState::Completed;
    }

    pub fn mark_failed(&mut self) {
        self.state = LoopState::Failed;
    }

    pub fn record_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn reached_max_iterations(&self) -> bool {
        self.max_iterations > 0 && self.iteration >= self.max_iterations
    }

    /// Consume one retry credit; `false` means the retry policy is
    /// exhausted and the instance should move to `Failed`.
    pub fn consume_retry(&mut self) -> bool {
        if self.retries_used >= self.retry_policy.max_retries {
            return false;
        }
        self.retries_used += 1;
        true
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
