// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StartRun {
    name: String,
    prd: String,
}

#[test]
fn outbound_envelope_round_trips_universal_fields() {
    let env = OutboundEnvelope::new(outbound_type::PONG, Ping {});
    let json = env.to_json_string().unwrap();

    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["type"], "pong");
    assert!(value["id"].is_string());
    assert!(value["timestamp"].is_string());

    let inbound = InboundEnvelope::parse(Bytes::from(json)).unwrap();
    assert_eq!(inbound.meta.kind, "pong");
    assert_eq!(inbound.meta.id, env.meta.id);
}

#[test]
fn inbound_envelope_retains_raw_bytes_for_type_specific_decode() {
    let raw = serde_json::json!({
        "type": "start_run",
        "id": Uuid::new_v4(),
        "timestamp": Utc::now().to_rfc3339(),
        "name": "runner",
        "prd": "prd-1",
    })
    .to_string();

    let inbound = InboundEnvelope::parse(Bytes::from(raw)).unwrap();
    assert_eq!(inbound.meta.kind, inbound_type::START_RUN);

    let payload: StartRun = inbound.decode().unwrap();
    assert_eq!(payload.name, "runner");
    assert_eq!(payload.prd, "prd-1");
}

#[test]
fn parse_rejects_frames_missing_universal_fields() {
    let raw = serde_json::json!({ "name": "no type or id" }).to_string();
    assert!(InboundEnvelope::parse(Bytes::from(raw)).is_err());
}

#[test]
fn unknown_type_string_still_parses_for_dispatch_to_ignore() {
    let raw = serde_json::json!({
        "type": "something_the_agent_has_never_heard_of",
        "id": Uuid::new_v4(),
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string();

    let inbound = InboundEnvelope::parse(Bytes::from(raw)).unwrap();
    assert_eq!(inbound.meta.kind, "something_the_agent_has_never_heard_of");
}
