// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol-versioned greeting exchanged once after `Transport::connect`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::envelope::{handshake_type, InboundEnvelope};
use crate::error::HandshakeError;
use crate::transport::Transport;

const PROTOCOL_VERSION: u32 = 1;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
struct Hello {
    protocol_version: u32,
    chief_version: String,
    device_name: String,
    os: String,
    arch: String,
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct IncompatiblePayload {
    #[serde(default)]
    message: String,
}

/// Fields this agent presents to the backend on every handshake attempt.
pub struct HelloFields {
    pub access_token: String,
    pub chief_version: String,
    pub device_name: String,
}

/// Send one `hello` envelope and wait up to 10s for the server's reply,
/// branching on its type. No retry at this layer — `Transport`'s
/// reconnect loop is responsible for re-invoking this.
pub async fn handshake(
    transport: &Transport,
    inbound: &mut mpsc::Receiver<InboundEnvelope>,
    fields: HelloFields,
) -> Result<(), HandshakeError> {
    let hello = Hello {
        protocol_version: PROTOCOL_VERSION,
        chief_version: fields.chief_version,
        device_name: fields.device_name,
        os: std::env::consts::OS.to_owned(),
        arch: std::env::consts::ARCH.to_owned(),
        access_token: fields.access_token,
    };
    transport.send_envelope(handshake_type::HELLO, hello).await?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, inbound.recv()).await {
        Err(_) => Err(HandshakeError::Timeout),
        Ok(None) => Err(HandshakeError::ConnectionClosed),
        Ok(Some(envelope)) => match envelope.meta.kind.as_str() {
            handshake_type::WELCOME => Ok(()),
            handshake_type::INCOMPATIBLE => {
                let payload: IncompatiblePayload = envelope.decode().unwrap_or_default();
                Err(HandshakeError::Incompatible(payload.message))
            }
            handshake_type::AUTH_FAILED => Err(HandshakeError::AuthFailed),
            other => Err(HandshakeError::Protocol(other.to_owned())),
        },
    }
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
