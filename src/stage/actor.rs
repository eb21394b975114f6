// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-actor lifecycle (spec §4.7): the state machine driven exclusively
//! by the hosting stage, and the `ActorHandler` trait application code
//! implements to hook each transition.
//!
//! Grounded on `app/application/mod.rs`'s top-level `Application`
//! actor, which the teacher drives through an analogous
//! init-then-steady-state sequence; `ActorHandler`'s shape (one async
//! method per lifecycle hook) follows `app/stage/mod.rs`'s `Stage<C>`
//! trait.

use crate::{
    error::PlayHouseError,
    route::packet::RoutePacket,
    sender::DispatchContext,
};
use async_trait::async_trait;

/// Where an actor sits in spec §4.7's state diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// No packet has been accepted yet beyond the authenticate message.
    Created,
    /// `OnAuthenticate` returned `Ok`; `OnPostAuthenticate` about to run.
    Authenticated,
    /// Past `OnPostAuthenticate`; `OnJoinStage` about to run.
    Ready,
    /// `OnJoinStage` returned `Ok`; `OnPostJoinStage` about to run.
    Joined,
    /// Steady state: ordinary dispatch is accepted.
    Active,
    /// `Active`, but `OnConnectionChanged(false)` fired and no
    /// reconnect or destroy has happened yet.
    Disconnected,
}

/// Application hooks for one actor's lifecycle. Every method takes a
/// [`DispatchContext`] rather than reading an implicit "current header"
/// (see `sender` module docs for why).
#[async_trait]
pub trait ActorHandler: Send {
    /// Must set and return this actor's `AccountId` on success (spec
    /// §4.7: "`AccountId` must be set during `OnAuthenticate`").
    async fn on_authenticate(&mut self, ctx: &DispatchContext, packet: &RoutePacket) -> Result<String, PlayHouseError>;

    /// Runs once, right after a successful `on_authenticate`.
    async fn on_post_authenticate(&mut self, _ctx: &DispatchContext) {}

    /// Runs once, before the actor is considered joined to its stage.
    async fn on_join_stage(&mut self, _ctx: &DispatchContext) -> Result<(), PlayHouseError> {
        Ok(())
    }

    /// Runs once, right after a successful `on_join_stage`.
    async fn on_post_join_stage(&mut self, _ctx: &DispatchContext) {}

    /// Ordinary message dispatch, once the actor is `Active`.
    async fn on_dispatch(&mut self, ctx: &DispatchContext, packet: RoutePacket) -> Result<(), PlayHouseError>;

    /// The client connection backing this actor came up or went down.
    async fn on_connection_changed(&mut self, _ctx: &DispatchContext, _connected: bool) {}

    /// The actor is about to be removed from its stage.
    async fn on_destroy(&mut self, _ctx: &DispatchContext) {}
}

/// One actor's lifecycle state plus its application handler. Owned and
/// driven exclusively by its hosting stage's cycle — never mutated
/// concurrently (spec §5 "stage state is mutated only on its own
/// cycle").
pub struct Actor {
    sid: i64,
    account_id: String,
    state: ActorState,
    handler: Box<dyn ActorHandler>,
}

impl Actor {
    /// A freshly created, unauthenticated actor for client `sid`.
    pub fn new(sid: i64, handler: Box<dyn ActorHandler>) -> Self {
        Self {
            sid,
            account_id: String::new(),
            state: ActorState::Created,
            handler,
        }
    }

    /// The client session id this actor represents.
    pub fn sid(&self) -> i64 {
        self.sid
    }

    /// Empty until `on_authenticate` sets it.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.state
    }

    /// `Active` or `Disconnected`, i.e. past the join sequence.
    pub fn is_joined(&self) -> bool {
        matches!(self.state, ActorState::Active | ActorState::Disconnected)
    }

    /// Drive one packet through this actor. Before authentication, only
    /// `authenticate_message_id` is accepted (spec §4.7); any other
    /// `msgId` is rejected with `Unauthenticated` without reaching the
    /// handler at all. A successful authenticate packet drives the
    /// entire `Authenticated -> Ready -> Joined -> Active` sequence
    /// inline, matching the state diagram's lack of any other entry
    /// point into it.
    pub async fn dispatch(&mut self, authenticate_message_id: &str, ctx: &DispatchContext, packet: RoutePacket) -> Result<(), PlayHouseError> {
        if self.state == ActorState::Created {
            if ctx.header.msg_id != authenticate_message_id {
                return Err(PlayHouseError::Unauthenticated);
            }
            let account_id = self.handler.on_authenticate(ctx, &packet).await?;
            self.account_id = account_id;
            self.state = ActorState::Authenticated;
            self.handler.on_post_authenticate(ctx).await;
            self.state = ActorState::Ready;
            self.handler.on_join_stage(ctx).await?;
            self.state = ActorState::Joined;
            self.handler.on_post_join_stage(ctx).await;
            self.state = ActorState::Active;
            return Ok(());
        }
        self.handler.on_dispatch(ctx, packet).await
    }

    /// `OnConnectionChanged` (spec §4.7): toggles between `Active` and
    /// `Disconnected`. A no-op before the actor has joined, since there
    /// is no connected/disconnected distinction to make yet.
    pub async fn connection_changed(&mut self, ctx: &DispatchContext, connected: bool) {
        if !self.is_joined() {
            return;
        }
        self.state = if connected { ActorState::Active } else { ActorState::Disconnected };
        self.handler.on_connection_changed(ctx, connected).await;
    }

    /// Runs `OnDestroy`. The caller (the stage executor) is responsible
    /// for removing this actor from its stage's map afterward.
    pub async fn destroy(&mut self, ctx: &DispatchContext) {
        self.handler.on_destroy(ctx).await;
    }
}
