// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! A Session node bridging a simulated client connection to a Play
//! node hosting one stage type, `EchoStage`. Exercises the spec §8
//! "Echo", "Authentication gate", and "Push" scenarios end to end: a
//! fake [`ClientLink`] stands in for the TLS/WebSocket connector spec
//! §1 puts out of scope, while everything from the wire frame on in is
//! the real framing codec, router transport, and stage executor.
//!
//! Run with `cargo run --example echo_play_node`.

use async_trait::async_trait;
use playhouse::prelude::*;
use playhouse::route::packet::RoutePacket;
use playhouse::sender::DispatchContext;
use playhouse::session::{ClientLink, SessionBridge};
use playhouse::stage::{ActorHandler, StageHandler};
use playhouse::wire::{decode_client_frame, encode_client_frame, ClientFrame, ServerFrame};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Serialize, Deserialize)]
struct EchoRequest {
    content: String,
    sequence: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoReply {
    content: String,
    sequence: u32,
    processed_at: i64,
}

/// One client's actor inside an `EchoStage`. Holds no state beyond what
/// `ActorHandler` already tracks (`sid`/`accountId`); `EchoRequest` is
/// answered straight out of its own payload.
struct EchoActor;

#[async_trait]
impl ActorHandler for EchoActor {
    async fn on_authenticate(&mut self, _ctx: &DispatchContext, packet: &RoutePacket) -> Result<String, PlayHouseError> {
        #[derive(Deserialize)]
        struct AuthenticatePayload {
            user_id: String,
        }
        let body: AuthenticatePayload = serde_json::from_slice(packet.payload())
            .map_err(|err| PlayHouseError::InternalError(format!("malformed Authenticate payload: {err}")))?;
        log::info!("actor authenticated as {}", body.user_id);
        Ok(body.user_id)
    }

    async fn on_dispatch(&mut self, ctx: &DispatchContext, packet: RoutePacket) -> Result<(), PlayHouseError> {
        match ctx.header.msg_id.as_str() {
            "EchoRequest" => {
                let request: EchoRequest = serde_json::from_slice(packet.payload())
                    .map_err(|err| PlayHouseError::InternalError(format!("malformed EchoRequest: {err}")))?;
                let reply = EchoReply {
                    content: request.content,
                    sequence: request.sequence,
                    processed_at: chrono::Utc::now().timestamp_millis(),
                };
                let payload = serde_json::to_vec(&reply).unwrap_or_default();
                ctx.reply(0, payload).await
            }
            "BroadcastTrigger" => {
                #[derive(Serialize)]
                struct BroadcastNotify<'a> {
                    event_type: &'a str,
                    data: &'a str,
                }
                let push = serde_json::to_vec(&BroadcastNotify { event_type: "system", data: "Welcome!" }).unwrap_or_default();
                ctx.send_to_client("BroadcastNotify", push).await?;
                ctx.reply(0, Vec::new()).await
            }
            other => {
                log::warn!("EchoActor has no handler for {other:?}");
                Err(PlayHouseError::NotRouted)
            }
        }
    }
}

struct EchoStage;

#[async_trait]
impl StageHandler for EchoStage {
    async fn on_create(&mut self, _ctx: &DispatchContext, _payload: &[u8]) -> Result<(), PlayHouseError> {
        Ok(())
    }

    async fn on_dispatch(&mut self, _ctx: &DispatchContext, packet: RoutePacket) -> Result<(), PlayHouseError> {
        let _ = packet;
        Ok(())
    }

    fn create_actor(&self, _sid: i64) -> Box<dyn ActorHandler> {
        Box::new(EchoActor)
    }
}

/// A stand-in for the concrete TLS/WebSocket connector (spec §1's
/// explicit non-goal): collects every `ServerFrame` the Session bridge
/// hands back for this `sid` instead of writing it to a live socket.
struct RecordingLink {
    received: Mutex<Vec<ServerFrame>>,
}

#[async_trait]
impl ClientLink for RecordingLink {
    async fn send(&self, frame: ServerFrame) {
        log::info!("client <- {} (errorCode={})", frame.msg_id, frame.error_code);
        self.received.lock().unwrap().push(frame);
    }
    async fn disconnect(&self) {}
}

/// Decodes, then re-encodes a client frame through the real wire codec
/// before handing it to the bridge — exactly what a live connector
/// would do after reading `contentSize` bytes off a socket.
fn roundtrip_through_wire(frame: &ClientFrame, max_body_size: u32) -> ClientFrame {
    let encoded = encode_client_frame(frame, max_body_size).expect("well-formed demo frame encodes");
    let (decoded, _consumed) = decode_client_frame(&encoded, max_body_size)
        .expect("a frame this demo just encoded decodes")
        .expect("a single frame's worth of bytes is always a whole frame");
    decoded
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let play_config = PlayHouseConfig::new("tcp://127.0.0.1:17890")
        .server_id("play-1")
        .service_kind(playhouse::identity::ServiceKind::Play)
        .service_id(2)
        .authenticate_message_id("Authenticate");
    let play_node = Node::builder(play_config).build()?;
    play_node.register_stage_type("EchoStage", Arc::new(|| Box::new(EchoStage) as Box<dyn StageHandler>));
    play_node.start().await?;
    let play_nid = play_node.nid().clone();

    let session_config = PlayHouseConfig::new("tcp://127.0.0.1:17891")
        .server_id("session-1")
        .service_kind(playhouse::identity::ServiceKind::Session)
        .service_id(3);
    let session_node = Node::builder(session_config).session_node().build()?;
    session_node.start().await?;
    session_node.connect_peer("tcp://127.0.0.1:17890").await?;

    let bridge = session_node.session_bridge().expect("built with .session_node()").clone();
    let link = Arc::new(RecordingLink { received: Mutex::new(Vec::new()) });
    let sid = bridge.open_session(link.clone());

    // CreateStage: a lobby/matchmaking tier would normally do this, not
    // the client; driven here directly against the Play node to keep
    // the demo to one file.
    let created = play_node.sender().create_stage(&play_nid, "EchoStage", 12_345, Vec::new()).await?;
    log::info!("CreateStage replied with error_code={}", created.header().error_code);
    bridge.bind_stage(sid, play_nid.clone(), 12_345);

    forward_client_message(&session_node, &bridge, &play_nid, sid, "Authenticate", 1, serde_json::to_vec(&serde_json::json!({ "user_id": "u1" }))?).await?;
    bridge.set_account_id(sid, "u1");

    forward_client_message(
        &session_node,
        &bridge,
        &play_nid,
        sid,
        "EchoRequest",
        2,
        serde_json::to_vec(&EchoRequest { content: "Hello".to_string(), sequence: 42 })?,
    )
    .await?;

    // Push: BroadcastTrigger fans out a BroadcastNotify push ahead of
    // its own reply; both land in `link.received` in that order.
    forward_client_message(&session_node, &bridge, &play_nid, sid, "BroadcastTrigger", 3, Vec::new()).await?;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    for frame in link.received.lock().unwrap().iter() {
        log::info!("client observed: msgId={} msgSeq={} errorCode={}", frame.msg_id, frame.msg_seq, frame.error_code);
    }

    session_node.shutdown().await;
    play_node.shutdown().await;
    Ok(())
}

async fn forward_client_message(
    session_node: &Node,
    bridge: &Arc<SessionBridge>,
    play_nid: &playhouse::identity::Nid,
    sid: i64,
    msg_id: &str,
    client_msg_seq: u16,
    payload: Vec<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client_frame = ClientFrame { msg_id: msg_id.to_string(), msg_seq: client_msg_seq, stage_id: 12_345, payload };
    let client_frame = roundtrip_through_wire(&client_frame, 2 * 1024 * 1024);

    let (header, packet) = bridge.to_route_packet(sid, client_frame);
    let reply = session_node.sender().forward_to_stage(play_nid, header, packet.payload().to_vec()).await?;

    if let Some(reply) = reply {
        let frame = ServerFrame {
            msg_id: msg_id.to_string(),
            msg_seq: client_msg_seq,
            stage_id: 12_345,
            error_code: reply.header().error_code,
            payload: reply.payload().to_vec(),
        };
        bridge.deliver_to_client(sid, frame).await?;
    }
    Ok(())
}
