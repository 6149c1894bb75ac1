// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use super::*;
use crate::envelope::EnvelopeMeta;

fn envelope_of(kind: &str) -> InboundEnvelope {
    let meta = EnvelopeMeta::new(kind);
    let raw = serde_json::to_vec(&meta).unwrap();
    InboundEnvelope { meta, raw: Bytes::from(raw) }
}

fn counting_handler(hits: Arc<AtomicU32>) -> Handler {
    Arc::new(move |_env| {
        let hits = Arc::clone(&hits);
        Box::pin(async move {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    })
}

#[tokio::test]
async fn dispatch_routes_to_registered_handler() {
    let dispatcher = Dispatcher::new();
    let hits = Arc::new(AtomicU32::new(0));
    dispatcher.register("ping", counting_handler(Arc::clone(&hits))).await;

    dispatcher.dispatch(envelope_of("ping")).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatch_ignores_unknown_type() {
    let dispatcher = Dispatcher::new();
    let hits = Arc::new(AtomicU32::new(0));
    dispatcher.register("ping", counting_handler(Arc::clone(&hits))).await;

    dispatcher.dispatch(envelope_of("something_else")).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn register_replaces_previous_handler_for_same_type() {
    let dispatcher = Dispatcher::new();
    let first_hits = Arc::new(AtomicU32::new(0));
    let second_hits = Arc::new(AtomicU32::new(0));
    dispatcher.register("ping", counting_handler(Arc::clone(&first_hits))).await;
    dispatcher.register("ping", counting_handler(Arc::clone(&second_hits))).await;

    dispatcher.dispatch(envelope_of("ping")).await;
    assert_eq!(first_hits.load(Ordering::SeqCst), 0);
    assert_eq!(second_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unregister_stops_future_dispatch() {
    let dispatcher = Dispatcher::new();
    let hits = Arc::new(AtomicU32::new(0));
    dispatcher.register("ping", counting_handler(Arc::clone(&hits))).await;
    dispatcher.unregister("ping").await;

    dispatcher.dispatch(envelope_of("ping")).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
