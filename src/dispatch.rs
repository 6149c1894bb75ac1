// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Type-keyed routing from inbound envelopes to handlers.
//!
//! Grounded on `crates/mux/src/credential/broker.rs`'s read-write lock
//! discipline (reads for the hot path, writes only at registration time).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::envelope::InboundEnvelope;

/// A handler receives the decoded envelope (universal fields plus raw
/// bytes for its own type-specific decode).
pub type Handler = Arc<dyn Fn(InboundEnvelope) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Type→handler map guarded by a read-write lock. Reads happen on every
/// dispatched message; writes only at (un)registration.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`, replacing any previous registration.
    pub async fn register(&self, kind: impl Into<String>, handler: Handler) {
        self.handlers.write().await.insert(kind.into(), handler);
    }

    pub async fn unregister(&self, kind: &str) {
        self.handlers.write().await.remove(kind);
    }

    /// Route `envelope` to its registered handler. Unknown types are
    /// logged and ignored (forward compatibility with newer servers).
    pub async fn dispatch(&self, envelope: InboundEnvelope) {
        let handler = {
            let guard = self.handlers.read().await;
            guard.get(envelope.meta.kind.as_str()).cloned()
        };
        match handler {
            Some(handler) => handler(envelope).await,
            None => tracing::debug!(kind = %envelope.meta.kind, "no handler registered, ignoring"),
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
