// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem event listener: a top-level watcher that is always
//! installed, plus deep watchers installed only for recently-interacted
//! ("active") projects.
//!
//! Grounded on `crates/cli/src/driver/log_watch.rs::setup_notify_watcher`'s
//! `notify::recommended_watcher` callback-to-channel pattern, generalized
//! from one file to per-project subtrees and a top-level root watch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::envelope::{outbound_type, OutboundFrame, Outbox};
use crate::workspace::scanner::Scanner;

/// Sweep cadence for dropping inactive projects.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default inactivity timeout before deep watchers are torn down.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(600);

enum WatchSource {
    TopLevel,
    Project(String),
}

struct WatchEvent {
    source: WatchSource,
    paths: Vec<PathBuf>,
}

struct ActiveProject {
    path: PathBuf,
    last_activity: Instant,
    _watcher: RecommendedWatcher,
}

/// Top-level-always, deep-per-active-project filesystem watcher.
pub struct Watcher {
    scanner: Arc<Scanner>,
    active: Mutex<HashMap<String, ActiveProject>>,
    inactivity_timeout: Duration,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>,
    _top_level_watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Watcher {
    pub fn new(scanner: Arc<Scanner>, inactivity_timeout: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            scanner,
            active: Mutex::new(HashMap::new()),
            inactivity_timeout,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            _top_level_watcher: Mutex::new(None),
        }
    }

    /// Install the always-on top-level watcher, then process events and
    /// the inactivity sweeper until `cancel` fires.
    pub async fn run(&self, outbox: Outbox, cancel: CancellationToken) {
        let top_level = install_watcher(self.scanner.workspace_root(), RecursiveMode::NonRecursive, {
            let tx = self.event_tx.clone();
            move |event: notify::Event| {
                let _ = tx.send(WatchEvent { source: WatchSource::TopLevel, paths: event.paths });
            }
        });
        *self._top_level_watcher.lock().await = top_level;

        let mut event_rx = match self.event_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::error!("watcher run() called more than once");
                return;
            }
        };

        let mut sweeper = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event, &outbox).await,
                        None => return,
                    }
                }
                _ = sweeper.tick() => self.sweep_inactive().await,
            }
        }
    }

    /// Mark `name` active, refreshing last-activity if already active, or
    /// installing deep watchers if not. Idempotent.
    pub async fn activate(&self, name: &str) {
        let mut guard = self.active.lock().await;
        if let Some(entry) = guard.get_mut(name) {
            entry.last_activity = Instant::now();
            return;
        }

        let Some(project) = self.scanner.project_by_name(name).await else {
            tracing::debug!(project = name, "activate called for unknown project, ignoring");
            return;
        };

        let chief_dir = project.path.join(".chief");
        let git_dir = project.path.join(".git");
        let tx = self.event_tx.clone();
        let project_name = name.to_owned();
        let Some(watcher) = install_project_watcher(&chief_dir, &git_dir, move |event| {
            let _ = tx.send(WatchEvent {
                source: WatchSource::Project(project_name.clone()),
                paths: event.paths,
            });
        }) else {
            tracing::warn!(project = name, "failed to install deep watchers");
            return;
        };

        guard.insert(
            name.to_owned(),
            ActiveProject { path: project.path, last_activity: Instant::now(), _watcher: watcher },
        );
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.active.lock().await.contains_key(name)
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn handle_event(&self, event: WatchEvent, outbox: &Outbox) {
        match event.source {
            WatchSource::TopLevel => {
                if self.scanner.scan_and_update().await {
                    let frame = OutboundFrame::new(
                        outbound_type::PROJECT_LIST,
                        serde_json::json!({ "projects": self.scanner.current_snapshot().await }),
                    );
                    let _ = outbox.send(frame).await;
                }
            }
            WatchSource::Project(name) => {
                let path = {
                    let guard = self.active.lock().await;
                    guard.get(&name).map(|p| p.path.clone())
                };
                let Some(project_path) = path else { return };
                if !event.paths.iter().any(|p| should_emit_project_state(&project_path, p)) {
                    return;
                }
                if let Some(summary) = self.scanner.project_by_name(&name).await {
                    let frame = OutboundFrame::new(outbound_type::PROJECT_STATE, serde_json::json!({ "project": summary }));
                    let _ = outbox.send(frame).await;
                }
            }
        }
    }

    async fn sweep_inactive(&self) {
        let now = Instant::now();
        let mut guard = self.active.lock().await;
        guard.retain(|name, entry| {
            let keep = now.saturating_duration_since(entry.last_activity) <= self.inactivity_timeout;
            if !keep {
                tracing::debug!(project = name, "dropping inactive project, removing deep watchers");
            }
            keep
        });
    }
}

fn install_watcher(
    path: &Path,
    mode: RecursiveMode,
    handler: impl Fn(notify::Event) + Send + Sync + 'static,
) -> Option<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            handler(event);
        }
    })
    .ok()?;
    watcher.watch(path, mode).ok()?;
    Some(watcher)
}

fn install_project_watcher(
    chief_dir: &Path,
    git_dir: &Path,
    handler: impl Fn(notify::Event) + Send + Sync + 'static,
) -> Option<RecommendedWatcher> {
    let handler = Arc::new(handler);
    let h1 = Arc::clone(&handler);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            h1(event);
        }
    })
    .ok()?;
    let _ = watcher.watch(chief_dir, RecursiveMode::Recursive);
    let _ = watcher.watch(git_dir, RecursiveMode::Recursive);
    Some(watcher)
}

/// Classify a single event path under an active project.
fn should_emit_project_state(project_path: &Path, event_path: &Path) -> bool {
    let Ok(relative) = event_path.strip_prefix(project_path) else { return false };
    let components: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();

    if components.first().map(String::as_str) == Some(".chief") {
        return true;
    }
    if components.first().map(String::as_str) == Some(".git") {
        return components.iter().any(|c| c == "HEAD");
    }
    false
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
