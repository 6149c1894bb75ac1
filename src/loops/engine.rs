// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wraps [`Manager`] with subscription fan-out.
//!
//! Grounded on `crates/mux/src/upstream/aggregator_feed.rs`'s
//! subscriber-map-plus-non-blocking-send broadcast shape, narrowed from a
//! `tokio::sync::broadcast` channel (which has no per-subscriber capacity
//! control) to an explicit `RwLock<HashMap<id, Sender>>` so a single slow
//! subscriber can be dropped-from independently without blocking the
//! others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::loops::instance::LoopInstance;
use crate::loops::manager::{CompletionCallback, ManagerError, ManagerEvent, PostCompleteCallback};
use crate::loops::provider::Provider;
use crate::loops::Manager;

/// Bounded per-subscriber queue capacity.
const SUBSCRIBER_CAPACITY: usize = 100;
const STOP_ALL_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Engine {
    manager: Arc<Manager>,
    subscribers: Arc<RwLock<HashMap<u64, mpsc::Sender<ManagerEvent>>>>,
    next_id: AtomicU64,
    forwarder_cancel: CancellationToken,
    forwarder: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    pub fn new(iteration_timeout: Duration) -> Self {
        let (manager, mut events_rx) = Manager::new(iteration_timeout);
        let manager = Arc::new(manager);
        let subscribers: Arc<RwLock<HashMap<u64, mpsc::Sender<ManagerEvent>>>> = Arc::new(RwLock::new(HashMap::new()));
        let forwarder_cancel = CancellationToken::new();

        let forward_subscribers = Arc::clone(&subscribers);
        let forward_cancel = forwarder_cancel.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => return,
                    event = events_rx.recv() => {
                        let Some(event) = event else { return };
                        let guard = forward_subscribers.read().await;
                        for sender in guard.values() {
                            let _ = sender.try_send(event.clone());
                        }
                    }
                }
            }
        });

        Self { manager, subscribers, next_id: AtomicU64::new(0), forwarder_cancel, forwarder: Mutex::new(Some(forwarder)) }
    }

    pub async fn register(&self, instance: LoopInstance) -> Result<(), ManagerError> {
        self.manager.register(instance).await
    }

    pub async fn unregister(&self, name: &str) {
        self.manager.unregister(name).await
    }

    pub async fn start(&self, name: &str, provider: Arc<dyn Provider>, prompt: String) -> Result<(), ManagerError> {
        self.manager.start(name, provider, prompt).await
    }

    pub async fn pause(&self, name: &str) -> Result<(), ManagerError> {
        self.manager.pause(name).await
    }

    pub async fn resume(&self, name: &str, provider: Arc<dyn Provider>, prompt: String) -> Result<(), ManagerError> {
        self.manager.resume(name, provider, prompt).await
    }

    pub async fn stop(&self, name: &str) {
        self.manager.stop(name).await
    }

    pub async fn get(&self, name: &str) -> Option<LoopInstance> {
        self.manager.get(name).await
    }

    pub async fn list(&self) -> Vec<LoopInstance> {
        self.manager.list().await
    }

    pub async fn set_on_complete(&self, cb: CompletionCallback) {
        self.manager.set_on_complete(cb).await
    }

    pub async fn set_on_post_complete(&self, cb: PostCompleteCallback) {
        self.manager.set_on_post_complete(cb).await
    }

    /// Allocate a new bounded subscriber queue. The returned id is passed
    /// to [`Engine::unsubscribe`]; dropping the receiver without calling
    /// it leaks the map entry until explicitly removed.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<ManagerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    /// Idempotent: unsubscribing an id that is not present (already
    /// removed, or never issued) is a no-op.
    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// `StopAll` followed by forwarder teardown. Idempotent: a second
    /// call finds the forwarder handle already taken and simply
    /// re-drains any running instances.
    pub async fn shutdown(&self) {
        self.manager.stop_all(STOP_ALL_DRAIN_TIMEOUT).await;
        self.forwarder_cancel.cancel();
        if let Some(handle) = self.forwarder.lock().await.take() {
            let _ = handle.await;
        }
        self.subscribers.write().await.clear();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
