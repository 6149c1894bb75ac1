// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::transport::Transport;

#[derive(Clone, Copy)]
enum ServerBehavior {
    Welcome,
    Incompatible,
    AuthFailed,
    CloseImmediately,
    NeverRespond,
}

async fn behaving_socket(mut socket: WebSocket, behavior: ServerBehavior) {
    // Wait for the hello frame.
    let Some(Ok(AxumMessage::Text(_hello))) = socket.recv().await else {
        return;
    };

    match behavior {
        ServerBehavior::Welcome => {
            let _ = socket
                .send(AxumMessage::Text(
                    serde_json::json!({
                        "type": "welcome",
                        "id": uuid::Uuid::new_v4(),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    })
                    .to_string()
                    .into(),
                ))
                .await;
        }
        ServerBehavior::Incompatible => {
            let _ = socket
                .send(AxumMessage::Text(
                    serde_json::json!({
                        "type": "incompatible",
                        "id": uuid::Uuid::new_v4(),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "message": "chief v0.3.0 is too old",
                    })
                    .to_string()
                    .into(),
                ))
                .await;
        }
        ServerBehavior::AuthFailed => {
            let _ = socket
                .send(AxumMessage::Text(
                    serde_json::json!({
                        "type": "auth_failed",
                        "id": uuid::Uuid::new_v4(),
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                    })
                    .to_string()
                    .into(),
                ))
                .await;
        }
        ServerBehavior::CloseImmediately => {
            let _ = socket.send(AxumMessage::Close(None)).await;
        }
        ServerBehavior::NeverRespond => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
}

async fn spawn_mock_server(behavior: ServerBehavior) -> String {
    let app = Router::new()
        .route(
            "/ws",
            get(
                move |ws: WebSocketUpgrade, State(behavior): State<ServerBehavior>| async move {
                    ws.on_upgrade(move |socket| behaving_socket(socket, behavior))
                },
            ),
        )
        .with_state(behavior);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

fn fields() -> HelloFields {
    HelloFields {
        access_token: "tok".to_owned(),
        chief_version: "0.3.0".to_owned(),
        device_name: "lap".to_owned(),
    }
}

#[tokio::test]
async fn welcome_response_succeeds() {
    let url = spawn_mock_server(ServerBehavior::Welcome).await;
    let cancel = CancellationToken::new();
    let (transport, mut inbound) = Transport::connect(url, cancel).await.unwrap();
    handshake(&transport, &mut inbound, fields()).await.unwrap();
}

#[tokio::test]
async fn incompatible_response_carries_server_message() {
    let url = spawn_mock_server(ServerBehavior::Incompatible).await;
    let cancel = CancellationToken::new();
    let (transport, mut inbound) = Transport::connect(url, cancel).await.unwrap();
    let err = handshake(&transport, &mut inbound, fields()).await.unwrap_err();
    match err {
        HandshakeError::Incompatible(msg) => assert_eq!(msg, "chief v0.3.0 is too old"),
        other => panic!("expected Incompatible, got {other:?}"),
    }
}

#[tokio::test]
async fn auth_failed_response_is_fixed_error() {
    let url = spawn_mock_server(ServerBehavior::AuthFailed).await;
    let cancel = CancellationToken::new();
    let (transport, mut inbound) = Transport::connect(url, cancel).await.unwrap();
    let err = handshake(&transport, &mut inbound, fields()).await.unwrap_err();
    assert!(matches!(err, HandshakeError::AuthFailed));
}

#[tokio::test]
async fn closed_before_response_is_connection_closed_error() {
    let url = spawn_mock_server(ServerBehavior::CloseImmediately).await;
    let cancel = CancellationToken::new();
    let (transport, mut inbound) = Transport::connect(url, cancel).await.unwrap();
    let err = handshake(&transport, &mut inbound, fields()).await.unwrap_err();
    assert!(matches!(err, HandshakeError::ConnectionClosed));
}

#[tokio::test(start_paused = true)]
async fn no_response_within_ten_seconds_times_out() {
    let url = spawn_mock_server(ServerBehavior::NeverRespond).await;
    let cancel = CancellationToken::new();
    let (transport, mut inbound) = Transport::connect(url, cancel).await.unwrap();

    let handshake_fut = handshake(&transport, &mut inbound, fields());
    tokio::pin!(handshake_fut);

    tokio::time::advance(Duration::from_secs(11)).await;
    let err = handshake_fut.await.unwrap_err();
    assert!(matches!(err, HandshakeError::Timeout));
}
