// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! A stateless API node exposing one backend RPC, `CreateRoom`, that
//! turns around and issues `GetOrCreateStage` against a Play node.
//! Exercises spec §8's "API→Play CreateStage" scenario: the first call
//! for a room id creates it, a second call for the same id observes
//! `IsCreated=false`. Also shows a node-level logging [`Filter`] ahead
//! of the controller's own handler.
//!
//! Run with `cargo run --example lobby_api_node`.

use async_trait::async_trait;
use playhouse::api::{ApiController, ApiDispatcher, ApiSender, Filter, HandlerRegister, Next};
use playhouse::node::CreateStageResult;
use playhouse::prelude::*;
use playhouse::route::packet::RoutePacket;
use playhouse::sender::DispatchContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct CreateRoomRequest {
    room_id: i64,
    room_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateRoomReply {
    room_id: i64,
    already_existed: bool,
}

/// Logs every request an API node handles before it reaches its
/// controller's own filters, mirroring spec §4.9's "node-level filter"
/// slot in the chain.
struct AccessLogFilter;

#[async_trait]
impl Filter for AccessLogFilter {
    async fn invoke(&self, ctx: ApiSender, packet: RoutePacket, next: Next<'_>) -> Result<(), PlayHouseError> {
        log::info!("{} <- {} from {}", ctx.header.msg_id, ctx.requester(), ctx.header.from);
        next.invoke(ctx, packet).await
    }
}

struct LobbyController {
    play_nid: Nid,
}

impl ApiController for LobbyController {
    fn register(&self, register: &mut HandlerRegister) -> Result<(), PlayHouseError> {
        let play_nid = self.play_nid.clone();
        register.add("CreateRoom", Vec::new(), move |ctx, packet| {
            let play_nid = play_nid.clone();
            async move {
                let request: CreateRoomRequest = serde_json::from_slice(packet.payload())
                    .map_err(|err| PlayHouseError::InternalError(format!("malformed CreateRoom request: {err}")))?;

                let reply = ctx.get_or_create_stage(&play_nid, &request.room_type, request.room_id, Vec::new()).await?;
                let result: CreateStageResult = serde_json::from_slice(reply.payload())
                    .map_err(|err| PlayHouseError::InternalError(format!("malformed CreateStage reply: {err}")))?;

                let payload = serde_json::to_vec(&CreateRoomReply { room_id: request.room_id, already_existed: !result.is_created }).unwrap_or_default();
                ctx.reply(0, payload).await
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let play_config = PlayHouseConfig::new("tcp://127.0.0.1:17892")
        .server_id("play-1")
        .service_kind(playhouse::identity::ServiceKind::Play)
        .service_id(2);
    let play_node = Node::builder(play_config).build()?;
    play_node.register_stage_type("Room", Arc::new(|| Box::new(NoopRoomStage) as Box<dyn playhouse::stage::StageHandler>));
    play_node.start().await?;
    let play_nid = play_node.nid().clone();

    let api_config = PlayHouseConfig::new("tcp://127.0.0.1:17893")
        .server_id("lobby-1")
        .service_kind(playhouse::identity::ServiceKind::Api)
        .service_id(4);
    let controller = LobbyController { play_nid: play_nid.clone() };
    let dispatcher = ApiDispatcher::builder()
        .node_filters(vec![Arc::new(AccessLogFilter)])
        .add_controller(&controller)?
        .build();
    let api_node = Node::builder(api_config).api_dispatcher(dispatcher).build()?;
    api_node.start().await?;
    api_node.connect_peer("tcp://127.0.0.1:17892").await?;

    let api_nid = api_node.nid().clone();
    let request = serde_json::to_vec(&CreateRoomRequest { room_id: 99_999, room_type: "Room".to_string() })?;
    let first = api_node.sender().request_to_api(&api_nid, "CreateRoom", request.clone()).await?;
    let first: CreateRoomReply = serde_json::from_slice(first.payload())?;
    log::info!("first CreateRoom: room_id={} already_existed={}", first.room_id, first.already_existed);
    assert!(!first.already_existed);

    let second = api_node.sender().request_to_api(&api_nid, "CreateRoom", request).await?;
    let second: CreateRoomReply = serde_json::from_slice(second.payload())?;
    log::info!("second CreateRoom: room_id={} already_existed={}", second.room_id, second.already_existed);
    assert!(second.already_existed);

    api_node.shutdown().await;
    play_node.shutdown().await;
    Ok(())
}

/// A Play-side stage type with no application behavior of its own;
/// this demo only cares about `GetOrCreateStage`'s create-vs-reuse
/// bookkeeping, not what happens once a room is joined.
struct NoopRoomStage;

#[async_trait]
impl playhouse::stage::StageHandler for NoopRoomStage {
    async fn on_create(&mut self, _ctx: &DispatchContext, _payload: &[u8]) -> Result<(), PlayHouseError> {
        Ok(())
    }
    async fn on_dispatch(&mut self, _ctx: &DispatchContext, _packet: RoutePacket) -> Result<(), PlayHouseError> {
        Ok(())
    }
    fn create_actor(&self, _sid: i64) -> Box<dyn playhouse::stage::ActorHandler> {
        unimplemented!("this demo never joins an actor to the room stage")
    }
}
