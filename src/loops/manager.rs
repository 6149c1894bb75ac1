// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative registry of [`LoopInstance`]s and the executor of their
//! state machine.
//!
//! Grounded on `crates/cli/src/driver/process.rs`'s child-process
//! liveness polling and `crates/mux/src/upstream/bridge.rs`'s
//! per-connection coroutine-plus-cancellation-token shape, generalized
//! from one long-lived process to one-iteration-at-a-time provider runs.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutionError;
use crate::loops::instance::{LoopInstance, RetryPolicy, TransitionError};
use crate::loops::provider::{Provider, ProviderEvent, RemediationKind};

const MANAGER_EVENT_CHANNEL_CAPACITY: usize = 256;
const STDERR_COMPACT_LINES: usize = 4;

/// One event surfaced by a running instance, wrapped with the owning
/// PRD's name and a terminal-state flag.
#[derive(Debug, Clone)]
pub struct ManagerEvent {
    pub prd_name: String,
    pub completed: bool,
    pub event: ProviderEvent,
}

pub type CompletionCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type PostCompleteCallback = Arc<dyn Fn(String, Option<String>, Option<std::path::PathBuf>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("a loop named {0:?} is already registered")]
    DuplicateName(String),
    #[error("no loop named {0:?} is registered")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

struct RunningHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Callbacks {
    on_complete: Option<CompletionCallback>,
    on_post_complete: Option<PostCompleteCallback>,
}

pub struct Manager {
    instances: Arc<Mutex<HashMap<String, LoopInstance>>>,
    running: Mutex<HashMap<String, RunningHandle>>,
    events_tx: mpsc::Sender<ManagerEvent>,
    callbacks: Arc<Mutex<Callbacks>>,
    iteration_timeout: Duration,
}

impl Manager {
    pub fn new(iteration_timeout: Duration) -> (Self, mpsc::Receiver<ManagerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(MANAGER_EVENT_CHANNEL_CAPACITY);
        let manager = Self {
            instances: Arc::new(Mutex::new(HashMap::new())),
            running: Mutex::new(HashMap::new()),
            events_tx,
            callbacks: Arc::new(Mutex::new(Callbacks { on_complete: None, on_post_complete: None })),
            iteration_timeout,
        };
        (manager, events_rx)
    }

    pub async fn set_on_complete(&self, cb: CompletionCallback) {
        self.callbacks.lock().await.on_complete = Some(cb);
    }

    pub async fn set_on_post_complete(&self, cb: PostCompleteCallback) {
        self.callbacks.lock().await.on_post_complete = Some(cb);
    }

    pub async fn register(&self, instance: LoopInstance) -> Result<(), ManagerError> {
        let mut guard = self.instances.lock().await;
        if guard.contains_key(&instance.name) {
            return Err(ManagerError::DuplicateName(instance.name));
        }
        guard.insert(instance.name.clone(), instance);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) {
        self.stop(name).await;
        self.instances.lock().await.remove(name);
    }

    pub async fn get(&self, name: &str) -> Option<LoopInstance> {
        self.instances.lock().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<LoopInstance> {
        self.instances.lock().await.values().cloned().collect()
    }

    /// Start (or resume) a loop. Spawns a dedicated executor task that
    /// drives the provider until completion, the iteration cap, or an
    /// unrecoverable error.
    pub async fn start(&self, name: &str, provider: Arc<dyn Provider>, prompt: String) -> Result<(), ManagerError> {
        {
            let mut guard = self.instances.lock().await;
            let instance = guard.get_mut(name).ok_or_else(|| ManagerError::NotFound(name.to_owned()))?;
            instance.start()?;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_executor(
            name.to_owned(),
            Arc::clone(&self.instances),
            provider,
            prompt,
            self.iteration_timeout,
            self.events_tx.clone(),
            Arc::clone(&self.callbacks),
            cancel.clone(),
        ));
        self.running.lock().await.insert(name.to_owned(), RunningHandle { cancel, task });
        Ok(())
    }

    pub async fn pause(&self, name: &str) -> Result<(), ManagerError> {
        let mut guard = self.instances.lock().await;
        let instance = guard.get_mut(name).ok_or_else(|| ManagerError::NotFound(name.to_owned()))?;
        instance.pause()?;
        drop(guard);
        if let Some(handle) = self.running.lock().await.remove(name) {
            handle.cancel.cancel();
        }
        Ok(())
    }

    pub async fn resume(&self, name: &str, provider: Arc<dyn Provider>, prompt: String) -> Result<(), ManagerError> {
        self.start(name, provider, prompt).await
    }

    /// Stop is idempotent and a no-op on an instance that isn't running.
    pub async fn stop(&self, name: &str) {
        let handle = self.running.lock().await.remove(name);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.task.await;
        }
        if let Some(instance) = self.instances.lock().await.get_mut(name) {
            instance.stop();
        }
    }

    pub async fn stop_all(&self, drain_timeout: Duration) {
        let names: Vec<String> = self.running.lock().await.keys().cloned().collect();
        let stops = names.into_iter().map(|name| async move { self.stop(&name).await });
        let _ = tokio::time::timeout(drain_timeout, futures_util::future::join_all(stops)).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_executor(
    name: String,
    instances: Arc<Mutex<HashMap<String, LoopInstance>>>,
    provider: Arc<dyn Provider>,
    prompt: String,
    iteration_timeout: Duration,
    events_tx: mpsc::Sender<ManagerEvent>,
    callbacks: Arc<Mutex<Callbacks>>,
    cancel: CancellationToken,
) {
    loop {
        let working_dir = match instances.lock().await.get(&name) {
            Some(instance) => instance.working_dir.clone().unwrap_or_else(|| instance.prd_path.clone()),
            None => return,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = run_one_iteration(provider.as_ref(), &working_dir, &prompt, iteration_timeout, &name, &events_tx) => outcome,
        };

        let mut guard = instances.lock().await;
        let Some(instance) = guard.get_mut(&name) else { return };

        match outcome {
            Ok(completion_hint) => {
                instance.record_iteration();
                if completion_hint {
                    instance.mark_completed();
                    let branch = instance.branch.clone();
                    let completed_working_dir = instance.working_dir.clone();
                    drop(guard);
                    send_terminal(&events_tx, &name, ProviderEvent::CompletionHint).await;
                    invoke_completion(&callbacks, &name).await;
                    invoke_post_completion(&callbacks, &name, branch, completed_working_dir).await;
                    return;
                }
                if instance.reached_max_iterations() {
                    instance.mark_failed();
                    drop(guard);
                    send_terminal(&events_tx, &name, ProviderEvent::Error("max iterations reached without completion".to_owned())).await;
                    return;
                }
            }
            Err(err) => {
                let retryable = err.is_retryable() && instance.consume_retry();
                if !retryable {
                    instance.mark_failed();
                    drop(guard);
                    send_terminal(&events_tx, &name, ProviderEvent::Error(err.to_string())).await;
                    return;
                }
                drop(guard);
                let _ = events_tx
                    .send(ManagerEvent { prd_name: name.clone(), completed: false, event: ProviderEvent::Error(err.to_string()) })
                    .await;
                tokio::time::sleep(instance_retry_backoff(&instances, &name).await).await;
            }
        }
    }
}

async fn instance_retry_backoff(instances: &Arc<Mutex<HashMap<String, LoopInstance>>>, name: &str) -> Duration {
    instances.lock().await.get(name).map(|i| i.retry_policy.backoff).unwrap_or(Duration::from_secs(5))
}

async fn send_terminal(events_tx: &mpsc::Sender<ManagerEvent>, name: &str, event: ProviderEvent) {
    let _ = events_tx.send(ManagerEvent { prd_name: name.to_owned(), completed: true, event }).await;
}

async fn invoke_completion(callbacks: &Arc<Mutex<Callbacks>>, name: &str) {
    let cb = callbacks.lock().await.on_complete.clone();
    if let Some(cb) = cb {
        cb(name.to_owned());
    }
}

async fn invoke_post_completion(
    callbacks: &Arc<Mutex<Callbacks>>,
    name: &str,
    branch: Option<String>,
    working_dir: Option<std::path::PathBuf>,
) {
    let cb = callbacks.lock().await.on_post_complete.clone();
    if let Some(cb) = cb {
        cb(name.to_owned(), branch, working_dir);
    }
}

/// Run one provider invocation to completion (or timeout), forwarding
/// parsed stdout events as they arrive. Returns whether the provider
/// signalled completion.
async fn run_one_iteration(
    provider: &dyn Provider,
    working_dir: &std::path::Path,
    prompt: &str,
    timeout: Duration,
    name: &str,
    events_tx: &mpsc::Sender<ManagerEvent>,
) -> Result<bool, ExecutionError> {
    let provider_name = provider.name().to_owned();
    let mut command = provider.loop_command(working_dir, prompt);
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let spawn_result = command.spawn();
    let mut child = match spawn_result {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExecutionError::MissingBinary {
                provider: provider_name.clone(),
                hint: provider.remediation_hint(RemediationKind::MissingBinary),
            });
        }
        Err(e) => {
            return Err(ExecutionError::ProcessFailed {
                provider: provider_name.clone(),
                cause: e.to_string(),
                hint: provider.remediation_hint(RemediationKind::ProcessFailed),
            });
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let run = async {
        let mut completed = false;
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(event) = provider.parse_line(&line) {
                    if matches!(event, ProviderEvent::CompletionHint) {
                        completed = true;
                    }
                    let _ = events_tx
                        .send(ManagerEvent { prd_name: name.to_owned(), completed: false, event })
                        .await;
                }
            }
        }

        let stderr_text = if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            compact_stderr(&collected)
        } else {
            String::new()
        };

        (completed, stderr_text)
    };

    let (completed, stderr_text, status) = match tokio::time::timeout(timeout, async {
        let (completed, stderr_text) = run.await;
        let status = child.wait().await;
        (completed, stderr_text, status)
    })
    .await
    {
        Ok(result) => result,
        Err(_) => {
            let _ = child.kill().await;
            return Err(ExecutionError::Timeout {
                provider: provider_name.clone(),
                hint: provider.remediation_hint(RemediationKind::Timeout),
            });
        }
    };

    let status = status.map_err(|e| ExecutionError::ProcessFailed {
        provider: provider_name.clone(),
        cause: e.to_string(),
        hint: provider.remediation_hint(RemediationKind::ProcessFailed),
    })?;

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        return Err(ExecutionError::NonZeroExit {
            provider: provider_name.clone(),
            code,
            stderr: stderr_text,
            hint: provider.remediation_hint(RemediationKind::NonZeroExit),
        });
    }

    Ok(completed)
}

/// First four stderr lines joined with " | ", with a truncation marker
/// appended if more were produced.
fn compact_stderr(lines: &[String]) -> String {
    let head: Vec<&str> = lines.iter().take(STDERR_COMPACT_LINES).map(String::as_str).collect();
    let mut compacted = head.join(" | ");
    if lines.len() > STDERR_COMPACT_LINES {
        compacted.push_str(" | ...");
    }
    compacted
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
