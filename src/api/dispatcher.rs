// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The API-tier handler registry and dispatcher (spec §4.9).
//!
//! Spec §9 flags the source's dynamic-reflection controller discovery
//! for replacement by "an explicit registration table built at startup
//! (builder pattern), keyed by msgId" while "preserving duplicate
//! detection and filter-chain composition" — this module is that
//! table. [`ApiController`] is the trait application code implements in
//! place of the source's `IApiController`/`IApiBackendController`
//! reflection targets; [`ApiDispatcherBuilder`] walks a fixed list of
//! controllers once at startup and fails fast on
//! [`PlayHouseError::DuplicateHandler`] (spec §7: "fatal at startup").
//!
//! Grounded on `app/application/mod.rs`'s `rt.start(name, actor)`
//! explicit-registration pattern (the teacher already builds its child
//! actor set at startup rather than discovering it at runtime) and on
//! `app/cluster/mod.rs`'s `ClusterEvent` `match` dispatch for the
//! lookup-by-key-then-invoke shape.

use crate::{
    api::filter::{
        invoke_chain,
        Filter,
        HandlerFn,
    },
    error::PlayHouseError,
    route::packet::RoutePacket,
    sender::DispatchContext,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
};

/// The context a registered handler runs with: no stage link (API
/// dispatch is stateless, spec §2), but the same `Reply`/send
/// operations as stage dispatch.
pub type ApiSender = DispatchContext;

/// Where a controller declares its message handlers (spec §4.9:
/// "Controllers declare message handlers by calling an
/// `IHandlerRegister.Add(msgId, fn)` during an initialization hook").
pub struct HandlerRegister {
    handlers: HashMap<String, (HandlerFn, Vec<Arc<dyn Filter>>)>,
}

impl Default for HandlerRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegister {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register `handler` for `msg_id`, wrapped by `filters` (this
    /// controller's own filters; node-level filters are prepended by
    /// the dispatcher at build time). `Err(DuplicateHandler)` if
    /// `msg_id` was already registered by an earlier controller.
    pub fn add<F, Fut>(&mut self, msg_id: impl Into<String>, filters: Vec<Arc<dyn Filter>>, handler: F) -> Result<(), PlayHouseError>
    where
        F: Fn(ApiSender, RoutePacket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PlayHouseError>> + Send + 'static,
    {
        let msg_id = msg_id.into();
        if self.handlers.contains_key(&msg_id) {
            return Err(PlayHouseError::DuplicateHandler(msg_id));
        }
        let boxed: HandlerFn = Arc::new(move |ctx, packet| Box::pin(handler(ctx, packet)));
        self.handlers.insert(msg_id, (boxed, filters));
        Ok(())
    }
}

/// A stateless handler group (spec §4.9 `IApiController`/
/// `IApiBackendController`). Implementations register their handlers
/// once, during [`ApiDispatcherBuilder::add_controller`].
pub trait ApiController: Send + Sync {
    /// Register this controller's handlers. Called exactly once, at
    /// dispatcher build time.
    fn register(&self, register: &mut HandlerRegister) -> Result<(), PlayHouseError>;

    /// Filters applied to every handler this controller registers, in
    /// addition to any node-level filters (spec §4.9 step 2: "a filter
    /// chain from controller- and node-level filter declarations").
    fn filters(&self) -> Vec<Arc<dyn Filter>> {
        Vec::new()
    }
}

/// Builds an [`ApiDispatcher`] from a fixed controller list, failing
/// fast on a duplicate `msgId` registration (spec §7
/// `DuplicateHandler`: "fatal at startup").
#[derive(Default)]
pub struct ApiDispatcherBuilder {
    register: HandlerRegister,
    node_filters: Vec<Arc<dyn Filter>>,
}

impl ApiDispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters applied ahead of every controller's own filters,
    /// regardless of which controller registered the matched handler.
    pub fn node_filters(mut self, filters: Vec<Arc<dyn Filter>>) -> Self {
        self.node_filters = filters;
        self
    }

    /// Register one controller's handlers, wrapped in its own filters.
    pub fn add_controller(mut self, controller: &dyn ApiController) -> Result<Self, PlayHouseError> {
        let controller_filters = controller.filters();
        let mut scoped = HandlerRegister::new();
        controller.register(&mut scoped)?;
        for (msg_id, (handler, mut filters)) in scoped.handlers {
            if self.register.handlers.contains_key(&msg_id) {
                return Err(PlayHouseError::DuplicateHandler(msg_id));
            }
            let mut combined = controller_filters.clone();
            combined.append(&mut filters);
            self.register.handlers.insert(msg_id, (handler, combined));
        }
        Ok(self)
    }

    pub fn build(self) -> ApiDispatcher {
        ApiDispatcher {
            handlers: self.register.handlers,
            node_filters: self.node_filters,
        }
    }
}

/// The built, immutable handler table an `Api` node dispatches against
/// (spec §4.9). Construction cannot fail once [`ApiDispatcherBuilder`]
/// has succeeded: every duplicate has already been rejected.
pub struct ApiDispatcher {
    handlers: HashMap<String, (HandlerFn, Vec<Arc<dyn Filter>>)>,
    node_filters: Vec<Arc<dyn Filter>>,
}

impl ApiDispatcher {
    pub fn builder() -> ApiDispatcherBuilder {
        ApiDispatcherBuilder::new()
    }

    /// Look up and run the handler for `ctx.header.msg_id` through its
    /// filter chain (spec §4.9 steps 1-3). On an uncaught handler
    /// error, replies `InternalError` if this was a request, logs
    /// otherwise (spec §4.9 step 4); an unmatched `msgId` replies/logs
    /// `NotRouted` the same way.
    pub async fn dispatch(&self, ctx: ApiSender, packet: RoutePacket) -> Result<(), PlayHouseError> {
        let msg_id = ctx.header.msg_id.clone();
        let msg_seq = ctx.header.msg_seq;
        let result = match self.handlers.get(&msg_id) {
            Some((handler, controller_filters)) => {
                let mut chain = self.node_filters.clone();
                chain.extend(controller_filters.iter().cloned());
                invoke_chain(&chain, handler, ctx.clone(), packet).await
            }
            None => Err(PlayHouseError::NotRouted),
        };

        if let Err(err) = &result {
            if msg_seq != 0 {
                let _ = ctx.reply(err.code(), Vec::new()).await;
            } else {
                log::info!("unhandled one-way {msg_id:?}: {err}");
            }
        }
        result
    }

    /// Number of registered handlers, for tests and admin surfaces.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::TestClock,
        correlator::Correlator,
        identity::Nid,
        registry::ServiceRegistry,
        route::header::RouteHeader,
        sender::Sender,
        transport::Transport,
    };
    use async_trait::async_trait;
    use std::{
        sync::Mutex,
        time::Duration,
    };

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Nid, RouteHeader, Vec<u8>)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, nid: &Nid, header: RouteHeader, payload: Vec<u8>) -> Result<(), PlayHouseError> {
            self.sent.lock().unwrap().push((nid.clone(), header, payload));
            Ok(())
        }
        async fn shutdown(&self) {}
    }

    fn ctx(transport: Arc<RecordingTransport>, msg_id: &str, msg_seq: u16) -> ApiSender {
        let sender = Arc::new(Sender::new(
            Nid::new(1, "api-1"),
            transport,
            Arc::new(ServiceRegistry::new(Arc::new(TestClock::new()), Duration::from_secs(5), Duration::from_secs(60))),
            Arc::new(Correlator::new()),
            Arc::new(TestClock::new()),
            Duration::from_secs(1),
        ));
        let mut header = RouteHeader::new(Nid::new(2, "lobby-client"), msg_id);
        header.msg_seq = msg_seq;
        DispatchContext::new(header, sender)
    }

    struct PingController;
    impl ApiController for PingController {
        fn register(&self, register: &mut HandlerRegister) -> Result<(), PlayHouseError> {
            register.add("Ping", Vec::new(), |ctx, _packet| async move { ctx.reply(0, b"pong".to_vec()).await })
        }
    }

    struct DuplicatePingController;
    impl ApiController for DuplicatePingController {
        fn register(&self, register: &mut HandlerRegister) -> Result<(), PlayHouseError> {
            register.add("Ping", Vec::new(), |_ctx, _packet| async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_registered_handler() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = ApiDispatcher::builder().add_controller(&PingController).unwrap().build();

        let ctx = ctx(transport.clone(), "Ping", 7);
        let packet = RoutePacket::new(ctx.header.clone(), Vec::new());
        dispatcher.dispatch(ctx, packet).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2, b"pong");
    }

    #[tokio::test]
    async fn building_with_a_duplicate_msg_id_fails_fast() {
        let err = ApiDispatcher::builder()
            .add_controller(&PingController)
            .unwrap()
            .add_controller(&DuplicatePingController)
            .unwrap_err();
        assert!(matches!(err, PlayHouseError::DuplicateHandler(ref id) if id == "Ping"));
    }

    #[tokio::test]
    async fn unmatched_msg_id_replies_not_routed() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = ApiDispatcher::builder().add_controller(&PingController).unwrap().build();

        let ctx = ctx(transport.clone(), "Nonexistent", 3);
        let packet = RoutePacket::new(ctx.header.clone(), Vec::new());
        let err = dispatcher.dispatch(ctx, packet).await.unwrap_err();
        assert!(matches!(err, PlayHouseError::NotRouted));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].1.error_code, PlayHouseError::NotRouted.code());
    }

    #[tokio::test]
    async fn unmatched_one_way_is_logged_not_replied() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = ApiDispatcher::builder().add_controller(&PingController).unwrap().build();

        let ctx = ctx(transport.clone(), "Nonexistent", 0);
        let packet = RoutePacket::new(ctx.header.clone(), Vec::new());
        let err = dispatcher.dispatch(ctx, packet).await.unwrap_err();
        assert!(matches!(err, PlayHouseError::NotRouted));
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
