// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic enumeration of repository directories under the workspace
//! root.
//!
//! Grounded on
//! `examples/alfredjeanlab-oddjobs/crates/daemon/src/adapters/agent/mod.rs`'s
//! `detect_git_branch_async`/`detect_git_remote` shelling out to `git` via
//! `tokio::process::Command`, and `crates/cli/src/driver/log_watch.rs`'s
//! ticker-plus-immediate-first-scan `run` loop shape.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::envelope::{outbound_type, OutboundFrame, Outbox};

/// Name of the per-project descriptor directory.
const CHIEF_MARKER_DIR: &str = ".chief";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCommit {
    pub hash: String,
    pub subject: String,
    pub author: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrdDescriptor {
    pub id: String,
    pub name: String,
    pub story_count: usize,
    pub status: String,
}

impl PartialEq for PrdDescriptor {
    /// Ignores `name`: a PRD's identity for diffing purposes is its id,
    /// story count, and status, so a display-name-only rename doesn't
    /// register as a change.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.story_count == other.story_count && self.status == other.status
    }
}

impl Eq for PrdDescriptor {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub has_chief: bool,
    pub branch: Option<String>,
    pub last_commit: Option<LastCommit>,
    pub prds: Vec<PrdDescriptor>,
}

#[derive(Debug, Deserialize)]
struct PrdFile {
    #[serde(default)]
    project: String,
    #[serde(rename = "userStories", default)]
    user_stories: Vec<UserStory>,
}

#[derive(Debug, Deserialize)]
struct UserStory {
    #[allow(dead_code)]
    id: String,
    #[serde(default)]
    passes: bool,
}

/// Periodic enumerator of the workspace root's direct project
/// subdirectories, diffed against the previous snapshot.
pub struct Scanner {
    workspace_root: PathBuf,
    interval: Duration,
    snapshot: Mutex<Vec<ProjectSummary>>,
}

impl Scanner {
    pub fn new(workspace_root: PathBuf, interval: Duration) -> Self {
        Self { workspace_root, interval, snapshot: Mutex::new(Vec::new()) }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Enumerate direct children of the workspace root that are
    /// directories containing a `.git` entry and derive a summary for
    /// each. Never fails wholesale: a single project's git commands or a
    /// single PRD's parse error only drops that piece, logged.
    pub async fn scan(&self) -> Vec<ProjectSummary> {
        let mut entries = match tokio::fs::read_dir(&self.workspace_root).await {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!(err = %e, root = %self.workspace_root.display(), "failed to read workspace root");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(err = %e, "error walking workspace root entries");
                    break;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !has_git_entry(&path).await {
                continue;
            }
            candidates.push(path);
        }
        candidates.sort();

        let mut summaries = Vec::with_capacity(candidates.len());
        for path in candidates {
            summaries.push(summarize_project(&path).await);
        }
        summaries
    }

    /// Scan, compare structurally to the stored snapshot, and swap if
    /// different. Returns `true` iff the snapshot changed.
    pub async fn scan_and_update(&self) -> bool {
        let fresh = self.scan().await;
        let mut guard = self.snapshot.lock().await;
        if *guard == fresh {
            false
        } else {
            *guard = fresh;
            true
        }
    }

    pub async fn current_snapshot(&self) -> Vec<ProjectSummary> {
        self.snapshot.lock().await.clone()
    }

    pub async fn project_by_name(&self, name: &str) -> Option<ProjectSummary> {
        self.snapshot.lock().await.iter().find(|p| p.name == name).cloned()
    }

    /// One scan immediately, then tick at `interval` until `cancel` fires.
    /// Emits `project_list` on every detected change.
    pub async fn run(&self, outbox: Outbox, cancel: CancellationToken) {
        if self.scan_and_update().await {
            emit_project_list(&outbox, self.current_snapshot().await).await;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; already scanned above

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if self.scan_and_update().await {
                        emit_project_list(&outbox, self.current_snapshot().await).await;
                    }
                }
            }
        }
    }
}

async fn emit_project_list(outbox: &Outbox, projects: Vec<ProjectSummary>) {
    let frame = OutboundFrame::new(outbound_type::PROJECT_LIST, serde_json::json!({ "projects": projects }));
    if outbox.send(frame).await.is_err() {
        tracing::debug!("outbox closed, dropping project_list emission");
    }
}

async fn has_git_entry(project_path: &Path) -> bool {
    tokio::fs::symlink_metadata(project_path.join(".git")).await.is_ok()
}

async fn summarize_project(path: &Path) -> ProjectSummary {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let has_chief = tokio::fs::metadata(path.join(CHIEF_MARKER_DIR)).await.map(|m| m.is_dir()).unwrap_or(false);
    let branch = current_branch(path).await;
    let last_commit = last_commit(path).await;
    let prds = if has_chief { scan_prds(path).await } else { Vec::new() };

    ProjectSummary { name, path: path.to_path_buf(), has_chief, branch, last_commit, prds }
}

async fn current_branch(path: &Path) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(["-C", &path.display().to_string(), "rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if branch.is_empty() {
        None
    } else {
        Some(branch)
    }
}

async fn last_commit(path: &Path) -> Option<LastCommit> {
    let output = tokio::process::Command::new("git")
        .args(["-C", &path.display().to_string(), "log", "-1", "--format=%H%n%s%n%an%n%aI"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mut lines = text.lines();
    let hash = lines.next()?.to_owned();
    let subject = lines.next().unwrap_or_default().to_owned();
    let author = lines.next().unwrap_or_default().to_owned();
    let timestamp = lines.next().unwrap_or_default().to_owned();
    Some(LastCommit { hash, subject, author, timestamp })
}

/// Read `<chief>/prds/*/prd.json`. A parse error on a single PRD drops
/// only that PRD; it never fails the scan.
async fn scan_prds(project_path: &Path) -> Vec<PrdDescriptor> {
    let prds_dir = project_path.join(CHIEF_MARKER_DIR).join("prds");
    let mut entries = match tokio::fs::read_dir(&prds_dir).await {
        Ok(rd) => rd,
        Err(_) => return Vec::new(),
    };

    let mut ids = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.is_dir() {
            ids.push(path);
        }
    }
    ids.sort();

    let mut descriptors = Vec::with_capacity(ids.len());
    for prd_dir in ids {
        let id = prd_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        match parse_prd_file(&prd_dir.join("prd.json")).await {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => {
                tracing::warn!(prd = %id, err = %e, "skipping unparseable prd.json");
            }
        }
    }
    descriptors
}

async fn parse_prd_file(path: &Path) -> Result<PrdDescriptor, serde_json::Error> {
    let id = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let contents = tokio::fs::read_to_string(path).await.map_err(serde::de::Error::custom)?;
    let file: PrdFile = serde_json::from_str(&contents)?;

    let total = file.user_stories.len();
    let passed = file.user_stories.iter().filter(|s| s.passes).count();
    let name = if file.project.is_empty() { id.clone() } else { file.project };

    Ok(PrdDescriptor { id, name, story_count: total, status: format!("{passed}/{total}") })
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
