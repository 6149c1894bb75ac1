// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex framed message channel with auto-reconnect, exponential backoff,
//! and a heartbeat responder.
//!
//! Grounded on `crates/mux/src/upstream/bridge.rs::run_loop`'s
//! connect/read/redial structure, generalized from its one-downstream-many
//! fan-out shape to this crate's single consumer, and on
//! `crates/cli/src/mux_client.rs`'s attempt-counted backoff.

pub mod handshake;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// How many undelivered inbound envelopes this agent will buffer before it
/// starts dropping.
const INBOUND_QUEUE_CAPACITY: usize = 256;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HEARTBEAT_WRITE_DEADLINE: Duration = Duration::from_secs(5);

/// A hook invoked strictly between a reconnection completing and the next
/// dispatched inbound message. Boxed rather than generic so `Transport`
/// stays object-free and cloneable as an `Arc`.
pub type ReconnectHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Single duplex WebSocket connection with internal reconnect management.
///
/// `Connect` (the `connect` free function) dials synchronously so the
/// caller can run the handshake immediately after; every *subsequent*
/// reconnect happens inside the background read task and fires
/// `on_reconnect` before resuming dispatch.
pub struct Transport {
    url: String,
    write: Arc<Mutex<Option<WsSink>>>,
    on_reconnect: Arc<Mutex<Option<ReconnectHook>>>,
    cancel: CancellationToken,
}

impl Transport {
    /// Dial `url`, retrying with backoff until connected or `cancel` fires.
    /// Returns the transport handle and the receive queue for inbound
    /// envelopes; the caller is expected to run the handshake next.
    pub async fn connect(
        url: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<(Arc<Transport>, mpsc::Receiver<InboundEnvelope>), TransportError> {
        let url = url.into();
        let mut attempt = 0u32;
        let stream = match dial(&url, &cancel, &mut attempt).await {
            Some(s) => s,
            None => return Err(TransportError::Closed),
        };

        let (sink, read) = stream.split();
        let write = Arc::new(Mutex::new(Some(sink)));
        let on_reconnect: Arc<Mutex<Option<ReconnectHook>>> = Arc::new(Mutex::new(None));
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

        let transport = Arc::new(Transport {
            url: url.clone(),
            write: Arc::clone(&write),
            on_reconnect: Arc::clone(&on_reconnect),
            cancel: cancel.clone(),
        });

        tokio::spawn(run(url, write, Some(read), inbound_tx, on_reconnect, cancel));

        Ok((transport, inbound_rx))
    }

    /// Register the post-reconnect hook. Replaces any previously set hook.
    pub async fn set_on_reconnect(&self, hook: ReconnectHook) {
        *self.on_reconnect.lock().await = Some(hook);
    }

    /// Marshal `value` to JSON and emit one text frame. Blocks on the
    /// write mutex; fails with `Closed` while disconnected.
    pub async fn send<T: Serialize>(&self, value: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(value)?;
        let mut guard = self.write.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(Message::Text(text.into())).await.map_err(TransportError::from),
            None => Err(TransportError::Closed),
        }
    }

    /// Convenience for sending a freshly-stamped outbound envelope.
    pub async fn send_envelope<T: Serialize>(
        &self,
        kind: impl Into<String>,
        payload: T,
    ) -> Result<(), TransportError> {
        self.send(&OutboundEnvelope::new(kind, payload)).await
    }

    /// Send a close frame, stop the background reader, and mark the
    /// transport unusable for further sends.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.cancel.cancel();
        let mut guard = self.write.lock().await;
        if let Some(sink) = guard.as_mut() {
            let _ = sink.send(Message::Close(None)).await;
        }
        *guard = None;
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn dial(url: &str, cancel: &CancellationToken, attempt: &mut u32) -> Option<WsStream> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => return Some(stream),
            Err(e) => {
                *attempt += 1;
                let delay = backoff_delay(*attempt);
                tracing::debug!(err = %e, attempt = *attempt, delay = ?delay, "transport dial failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return None,
                }
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = INITIAL_BACKOFF.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let base = exp.min(MAX_BACKOFF.as_secs_f64());
    let jitter = 0.5 + rand::random::<f64>();
    Duration::from_secs_f64(base * jitter)
}

/// Background connection manager: drives the current connection's read
/// half, and redials with backoff whenever it ends, until `cancel` fires.
async fn run(
    url: String,
    write: Arc<Mutex<Option<WsSink>>>,
    mut initial_read: Option<WsRead>,
    inbound_tx: mpsc::Sender<InboundEnvelope>,
    on_reconnect: Arc<Mutex<Option<ReconnectHook>>>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        let mut read = match initial_read.take() {
            Some(r) => r,
            None => {
                let stream = match dial(&url, &cancel, &mut attempt).await {
                    Some(s) => s,
                    None => return,
                };
                attempt = 0;
                let (sink, r) = stream.split();
                *write.lock().await = Some(sink);
                if let Some(hook) = on_reconnect.lock().await.clone() {
                    hook().await;
                }
                r
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    *write.lock().await = None;
                    return;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match InboundEnvelope::parse(Bytes::from(text.as_bytes().to_vec())) {
                                Ok(env) => {
                                    if inbound_tx.try_send(env).is_err() {
                                        tracing::warn!("inbound queue full, dropping envelope");
                                    }
                                }
                                Err(e) => tracing::warn!(err = %e, "malformed envelope frame, skipping"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let mut guard = write.lock().await;
                            if let Some(sink) = guard.as_mut() {
                                let _ = tokio::time::timeout(
                                    HEARTBEAT_WRITE_DEADLINE,
                                    sink.send(Message::Pong(data)),
                                )
                                .await;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::debug!("transport connection closed by peer");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(err = %e, "transport read error");
                            break;
                        }
                    }
                }
            }
        }

        *write.lock().await = None;
        if cancel.is_cancelled() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
