// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The connected-agent plane: a resilient duplex control channel to a
//! cloud backend, a multi-project loop orchestrator, and a workspace
//! observation plane.

pub mod config;
pub mod credential;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod loops;
pub mod ratelimit;
pub mod transport;
pub mod workspace;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use config::AgentConfig;
use credential::{CredentialStore, RefreshCoordinator};
use dispatch::Dispatcher;
use envelope::{inbound_type, outbound_type, InboundEnvelope, OutboundFrame, Outbox};
use error::{ErrorCode, HandshakeError};
use loops::{Engine, ProviderResolver};
use ratelimit::{Decision, RateLimiter};
use transport::handshake::{handshake, HelloFields};
use transport::Transport;
use workspace::{Scanner, Watcher};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Outbox channel depth: deep enough to absorb a scan/watch burst without
/// the forwarder task falling behind the Transport's own write mutex.
const OUTBOX_CAPACITY: usize = 256;

/// Run the agent to completion: connect, handshake, wire the dispatcher
/// to the Scanner/Watcher/Engine, and serve until cancelled.
///
/// `provider_resolver` supplies the `Provider` a `start_run`/`resume_run`
/// message should execute against; this crate ships no concrete provider,
/// so the caller embedding it decides what "claude", "gemini", or any
/// other driver resolves to.
pub async fn run(config: AgentConfig, provider_resolver: ProviderResolver) -> anyhow::Result<()> {
    config.validate()?;

    let cancel = CancellationToken::new();
    let credential_path = config.credential_path.clone().unwrap_or_else(credential::store::default_credential_path);
    let store = CredentialStore::new(credential_path);
    let record = store.load()?;

    let refresh = Arc::new(RefreshCoordinator::new(
        store,
        config.oauth_token_path.clone(),
        config.oauth_revoke_path.clone(),
    ));
    let record = refresh.refresh(&config.backend_url).await.unwrap_or(record);

    let scanner = Arc::new(Scanner::new(config.workspace.clone(), config.scan_interval()));
    let watcher = Arc::new(Watcher::new(Arc::clone(&scanner), config.watch_inactivity()));
    let engine = Arc::new(Engine::new(config.iteration_timeout()));
    let rate_limiter = Arc::new(RateLimiter::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let (outbox, mut outbox_rx) = mpsc::channel::<OutboundFrame>(OUTBOX_CAPACITY);

    let (transport, mut inbound_rx) = Transport::connect(config.backend_url.clone(), cancel.clone()).await?;

    handshake(
        &transport,
        &mut inbound_rx,
        HelloFields {
            access_token: record.access_token.clone(),
            chief_version: AGENT_VERSION.to_owned(),
            device_name: config.device_name.clone(),
        },
    )
    .await
    .map_err(|e| match e {
        HandshakeError::Incompatible(msg) => anyhow::anyhow!("server rejected protocol version: {msg}"),
        HandshakeError::AuthFailed => anyhow::anyhow!("deauthorized, re-login required"),
        other => anyhow::Error::new(other),
    })?;

    register_reconnect_hook(&transport, Arc::clone(&scanner), Arc::clone(&engine), Arc::clone(&rate_limiter), outbox.clone()).await;
    register_handlers(
        &dispatcher,
        Arc::clone(&scanner),
        Arc::clone(&watcher),
        Arc::clone(&engine),
        provider_resolver,
        outbox.clone(),
    )
    .await;

    let scanner_task = tokio::spawn({
        let scanner = Arc::clone(&scanner);
        let outbox = outbox.clone();
        let cancel = cancel.clone();
        async move { scanner.run(outbox, cancel).await }
    });
    let watcher_task = tokio::spawn({
        let watcher = Arc::clone(&watcher);
        let outbox = outbox.clone();
        let cancel = cancel.clone();
        async move { watcher.run(outbox, cancel).await }
    });
    let forwarder_task = tokio::spawn({
        let transport = Arc::clone(&transport);
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    frame = outbox_rx.recv() => {
                        let Some(frame) = frame else { return };
                        if let Err(e) = transport.send_envelope(frame.kind, frame.payload).await {
                            tracing::warn!(err = %e, "failed to forward outbound frame");
                        }
                    }
                }
            }
        }
    });
    let dispatch_task = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let rate_limiter = Arc::clone(&rate_limiter);
        let outbox = outbox.clone();
        let cancel = cancel.clone();
        async move { run_dispatch_loop(dispatcher, rate_limiter, inbound_rx, outbox, cancel).await }
    });
    let refresh_task = tokio::spawn({
        let refresh = Arc::clone(&refresh);
        let backend_url = config.backend_url.clone();
        let outbox = outbox.clone();
        let cancel = cancel.clone();
        async move { run_refresh_loop(refresh, backend_url, outbox, cancel).await }
    });

    cancel.cancelled().await;

    let _ = tokio::join!(scanner_task, watcher_task, forwarder_task, dispatch_task, refresh_task);
    engine.shutdown().await;
    transport.close().await.ok();
    Ok(())
}

/// Dispatch loop: admits each inbound envelope through the rate limiter
/// before handing it to the Dispatcher, emitting a rate-limited error
/// envelope on denial.
async fn run_dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<RateLimiter>,
    mut inbound_rx: mpsc::Receiver<InboundEnvelope>,
    outbox: Outbox,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            envelope = inbound_rx.recv() => {
                let Some(envelope) = envelope else { return };
                match rate_limiter.check(envelope.meta.kind.as_str()).await {
                    Decision::Allow => dispatcher.dispatch(envelope).await,
                    Decision::Deny { retry_after } => {
                        let frame = OutboundFrame::new(
                            outbound_type::ERROR,
                            serde_json::json!({
                                "code": ErrorCode::RateLimited.as_str(),
                                "message": "rate limited",
                                "retry_after_ms": retry_after.as_millis(),
                                "request_id": envelope.meta.id,
                            }),
                        );
                        let _ = outbox.send(frame).await;
                    }
                }
            }
        }
    }
}

/// Periodically nudge the refresh coordinator; it only actually performs
/// a network call once the stored record enters its near-expiry margin.
/// A confirmed session expiry is terminal: announce it and let the root
/// cancellation unwind every other task.
const REFRESH_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

async fn run_refresh_loop(
    refresh: Arc<RefreshCoordinator>,
    backend_url: String,
    outbox: Outbox,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(REFRESH_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = refresh.refresh(&backend_url).await {
                    tracing::warn!(err = %e, "credential refresh failed");
                    if matches!(e, error::CredentialError::SessionExpired | error::CredentialError::NotLoggedIn) {
                        let frame = OutboundFrame::new(
                            outbound_type::SESSION_EXPIRED,
                            serde_json::json!({ "code": ErrorCode::SessionNotFound.as_str() }),
                        );
                        let _ = outbox.send(frame).await;
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    }
}

/// On every reconnect, reset the rate limiter and emit a fresh
/// `state_snapshot`.
async fn register_reconnect_hook(
    transport: &Arc<Transport>,
    scanner: Arc<Scanner>,
    engine: Arc<Engine>,
    rate_limiter: Arc<RateLimiter>,
    outbox: Outbox,
) {
    let hook: transport::ReconnectHook = Arc::new(move || {
        let scanner = Arc::clone(&scanner);
        let engine = Arc::clone(&engine);
        let rate_limiter = Arc::clone(&rate_limiter);
        let outbox = outbox.clone();
        Box::pin(async move {
            rate_limiter.reset().await;
            let projects = scanner.current_snapshot().await;
            let runs = engine.list().await;
            let frame = OutboundFrame::new(
                outbound_type::STATE_SNAPSHOT,
                serde_json::json!({ "projects": projects, "runs": runs.iter().map(|r| &r.name).collect::<Vec<_>>() }),
            );
            let _ = outbox.send(frame).await;
        })
    });
    transport.set_on_reconnect(hook).await;
}

/// Translate protocol commands into Scanner/Watcher/Engine operations.
/// Only the handlers this crate concretely drives are registered;
/// business payloads beyond what's named here are external vocabulary
/// the caller's own backend defines.
async fn register_handlers(
    dispatcher: &Dispatcher,
    scanner: Arc<Scanner>,
    watcher: Arc<Watcher>,
    engine: Arc<Engine>,
    provider_resolver: ProviderResolver,
    outbox: Outbox,
) {
    {
        let scanner = Arc::clone(&scanner);
        let outbox = outbox.clone();
        dispatcher
            .register(
                inbound_type::LIST_PROJECTS,
                Arc::new(move |_envelope: InboundEnvelope| {
                    let scanner = Arc::clone(&scanner);
                    let outbox = outbox.clone();
                    Box::pin(async move {
                        let projects = scanner.current_snapshot().await;
                        let frame = OutboundFrame::new(outbound_type::PROJECT_LIST, serde_json::json!({ "projects": projects }));
                        let _ = outbox.send(frame).await;
                    }) as _
                }),
            )
            .await;
    }

    {
        let scanner = Arc::clone(&scanner);
        let watcher = Arc::clone(&watcher);
        let outbox = outbox.clone();
        dispatcher
            .register(
                inbound_type::GET_PROJECT,
                Arc::new(move |envelope: InboundEnvelope| {
                    let scanner = Arc::clone(&scanner);
                    let watcher = Arc::clone(&watcher);
                    let outbox = outbox.clone();
                    Box::pin(async move {
                        #[derive(serde::Deserialize)]
                        struct Payload {
                            name: String,
                        }
                        let Ok(payload) = envelope.decode::<Payload>() else { return };
                        watcher.activate(&payload.name).await;
                        match scanner.project_by_name(&payload.name).await {
                            Some(project) => {
                                let frame = OutboundFrame::new(outbound_type::PROJECT_STATE, serde_json::json!({ "project": project }));
                                let _ = outbox.send(frame).await;
                            }
                            None => {
                                let frame = OutboundFrame::new(
                                    outbound_type::ERROR,
                                    serde_json::json!({ "code": ErrorCode::ProjectNotFound.as_str(), "message": "no such project" }),
                                );
                                let _ = outbox.send(frame).await;
                            }
                        }
                    }) as _
                }),
            )
            .await;
    }

    #[derive(serde::Deserialize)]
    struct RunPayload {
        name: String,
        #[serde(default)]
        prompt: String,
    }

    {
        let engine = Arc::clone(&engine);
        let resolver = Arc::clone(&provider_resolver);
        let outbox = outbox.clone();
        dispatcher
            .register(
                inbound_type::START_RUN,
                Arc::new(move |envelope: InboundEnvelope| {
                    let engine = Arc::clone(&engine);
                    let resolver = Arc::clone(&resolver);
                    let outbox = outbox.clone();
                    Box::pin(async move {
                        let Ok(payload) = envelope.decode::<RunPayload>() else { return };
                        match resolver(&payload.name) {
                            Some(provider) => {
                                if let Err(e) = engine.start(&payload.name, provider, payload.prompt).await {
                                    let frame = OutboundFrame::new(
                                        outbound_type::ERROR,
                                        serde_json::json!({ "code": ErrorCode::RunAlreadyActive.as_str(), "message": e.to_string() }),
                                    );
                                    let _ = outbox.send(frame).await;
                                }
                            }
                            None => {
                                let frame = OutboundFrame::new(
                                    outbound_type::ERROR,
                                    serde_json::json!({ "code": ErrorCode::ClaudeError.as_str(), "message": "no provider configured for this project" }),
                                );
                                let _ = outbox.send(frame).await;
                            }
                        }
                    }) as _
                }),
            )
            .await;
    }

    {
        let engine = Arc::clone(&engine);
        let outbox = outbox.clone();
        dispatcher
            .register(
                inbound_type::PAUSE_RUN,
                Arc::new(move |envelope: InboundEnvelope| {
                    let engine = Arc::clone(&engine);
                    let outbox = outbox.clone();
                    Box::pin(async move {
                        let Ok(payload) = envelope.decode::<RunPayload>() else { return };
                        if let Err(e) = engine.pause(&payload.name).await {
                            let frame = OutboundFrame::new(
                                outbound_type::ERROR,
                                serde_json::json!({ "code": ErrorCode::RunNotActive.as_str(), "message": e.to_string() }),
                            );
                            let _ = outbox.send(frame).await;
                        }
                    }) as _
                }),
            )
            .await;
    }

    {
        let engine = Arc::clone(&engine);
        dispatcher
            .register(
                inbound_type::STOP_RUN,
                Arc::new(move |envelope: InboundEnvelope| {
                    let engine = Arc::clone(&engine);
                    Box::pin(async move {
                        if let Ok(payload) = envelope.decode::<RunPayload>() {
                            engine.stop(&payload.name).await;
                        }
                    }) as _
                }),
            )
            .await;
    }

    {
        let engine = Arc::clone(&engine);
        let resolver = Arc::clone(&provider_resolver);
        let outbox = outbox.clone();
        dispatcher
            .register(
                inbound_type::RESUME_RUN,
                Arc::new(move |envelope: InboundEnvelope| {
                    let engine = Arc::clone(&engine);
                    let resolver = Arc::clone(&resolver);
                    let outbox = outbox.clone();
                    Box::pin(async move {
                        let Ok(payload) = envelope.decode::<RunPayload>() else { return };
                        match resolver(&payload.name) {
                            Some(provider) => {
                                if let Err(e) = engine.resume(&payload.name, provider, payload.prompt).await {
                                    let frame = OutboundFrame::new(
                                        outbound_type::ERROR,
                                        serde_json::json!({ "code": ErrorCode::RunNotActive.as_str(), "message": e.to_string() }),
                                    );
                                    let _ = outbox.send(frame).await;
                                }
                            }
                            None => {
                                let frame = OutboundFrame::new(
                                    outbound_type::ERROR,
                                    serde_json::json!({ "code": ErrorCode::ClaudeError.as_str(), "message": "no provider configured for this project" }),
                                );
                                let _ = outbox.send(frame).await;
                            }
                        }
                    }) as _
                }),
            )
            .await;
    }

    {
        let outbox = outbox.clone();
        dispatcher
            .register(
                inbound_type::PING,
                Arc::new(move |envelope: InboundEnvelope| {
                    let outbox = outbox.clone();
                    Box::pin(async move {
                        tracing::trace!(id = %envelope.meta.id, "ping");
                        let frame = OutboundFrame::new(outbound_type::PONG, serde_json::json!({}));
                        let _ = outbox.send(frame).await;
                    }) as _
                }),
            )
            .await;
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
