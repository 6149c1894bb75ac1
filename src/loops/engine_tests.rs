// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::loops::instance::RetryPolicy;
use crate::loops::provider::mock::MockProvider;

fn instance(name: &str, working_dir: &std::path::Path) -> LoopInstance {
    LoopInstance::new(name, working_dir.join("prd.json"), Some(working_dir.to_path_buf()), None, 10, RetryPolicy::default())
}

#[tokio::test]
async fn subscribe_then_unsubscribe_leaves_an_empty_subscriber_set() {
    let engine = Engine::new(Duration::from_secs(5));
    let (id_a, _rx_a) = engine.subscribe().await;
    let (id_b, _rx_b) = engine.subscribe().await;
    assert_eq!(engine.subscriber_count().await, 2);

    engine.unsubscribe(id_a).await;
    engine.unsubscribe(id_b).await;
    assert_eq!(engine.subscriber_count().await, 0);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let engine = Engine::new(Duration::from_secs(5));
    let (id, _rx) = engine.subscribe().await;
    engine.unsubscribe(id).await;
    engine.unsubscribe(id).await;
    assert_eq!(engine.subscriber_count().await, 0);
}

#[tokio::test]
async fn every_subscriber_receives_a_fanned_out_event() {
    let engine = Engine::new(Duration::from_secs(5));
    let dir = tempfile::tempdir().unwrap();
    engine.register(instance("proj/feature", dir.path())).await.unwrap();

    let (_id_a, mut rx_a) = engine.subscribe().await;
    let (_id_b, mut rx_b) = engine.subscribe().await;

    let provider = Arc::new(MockProvider::with_script("echo COMPLETE; exit 0"));
    engine.start("proj/feature", provider, "go".to_owned()).await.unwrap();

    let event_a = timeout(Duration::from_secs(5), rx_a.recv()).await.unwrap().unwrap();
    let event_b = timeout(Duration::from_secs(5), rx_b.recv()).await.unwrap().unwrap();
    assert_eq!(event_a.prd_name, "proj/feature");
    assert_eq!(event_b.prd_name, "proj/feature");
}

#[tokio::test]
async fn a_full_subscriber_queue_drops_the_event_without_blocking_others() {
    let engine = Engine::new(Duration::from_secs(5));
    let dir = tempfile::tempdir().unwrap();
    engine.register(instance("proj/feature", dir.path())).await.unwrap();

    let (_id_full, _rx_full) = engine.subscribe().await; // never drained, will fill up
    let (_id_live, mut rx_live) = engine.subscribe().await;

    let script = (0..150).map(|i| format!("echo 'STATUS: step{i}'")).collect::<Vec<_>>().join("; ");
    let script = format!("{script}; echo COMPLETE; exit 0");
    let provider = Arc::new(MockProvider::with_script(script));
    engine.start("proj/feature", provider, "go".to_owned()).await.unwrap();

    let mut saw_completion = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(5), rx_live.recv()).await {
        if event.completed {
            saw_completion = true;
            break;
        }
    }
    assert!(saw_completion, "the live subscriber must still observe the terminal event");
}

#[tokio::test]
async fn shutdown_stops_running_instances_and_tears_down_the_forwarder() {
    let engine = Engine::new(Duration::from_secs(30));
    let dir = tempfile::tempdir().unwrap();
    engine.register(instance("proj/feature", dir.path())).await.unwrap();
    engine.start("proj/feature", Arc::new(MockProvider::with_script("sleep 30")), "go".to_owned()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.shutdown().await;
}
