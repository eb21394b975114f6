// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! PlayHouse server-mesh core: node identity and discovery, inter-node
//! routing, single-threaded per-stage actor execution, request/reply
//! correlation, client framing, and the stateless API dispatcher.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod wire;
pub mod route;
pub mod registry;
pub mod correlator;
pub mod transport;
pub mod stage;
pub mod sender;
pub mod api;
pub mod session;
pub mod node;

/// Convenience re-exports for application code.
pub mod prelude {
    pub use crate::{
        api::{
            ApiSender,
            Filter,
            HandlerRegister,
        },
        clock::{
            Clock,
            SystemClock,
        },
        config::PlayHouseConfig,
        error::{
            ErrorCode,
            PlayHouseError,
        },
        identity::Nid,
        node::Node,
        route::{
            Payload,
            RouteHeader,
            RoutePacket,
        },
        sender::{
            ApiSenderExt,
            StageSenderExt,
        },
        stage::{
            actor::Actor,
            actor::ActorHandler,
            executor::StageExecutor,
            executor::StageHandler,
        },
    };
}
