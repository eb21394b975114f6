// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The top-level `Node` (spec §4, §5): owns the router transport, the
//! service registry, the correlator, and — depending on `ServiceKind` —
//! a stage host, an API dispatcher, or a session bridge. Wires together
//! the transport receive loop, the heartbeat loop, and the timer thread
//! that the rest of this crate's modules describe in isolation.
//!
//! Grounded on `app/application/mod.rs`'s `Scylla` top-level actor for
//! the overall shape (one long-lived owner holding every collaborator
//! and spawning the background loops that drive them) and on
//! `app/cluster/mod.rs` for wiring a transport's receive side into a
//! dispatch table keyed by message kind.

use crate::{
    api::{ApiDispatcher, ApiSender},
    clock::{Clock, SystemClock},
    config::PlayHouseConfig,
    correlator::Correlator,
    error::PlayHouseError,
    identity::Nid,
    registry::{
        heartbeat::{self, HeartbeatConfig, HeartbeatTransport},
        ServerInfo,
        ServerState,
        ServiceRegistry,
    },
    route::{
        header::RouteHeader,
        packet::RoutePacket,
        router::{self, LocalRouting, RouteTarget},
    },
    sender::Sender,
    session::SessionBridge,
    stage::{StageHandle, StageHandler},
    transport::{
        router_socket::{Inbound, RouterSocket, RouterSocketConfig},
        Transport,
    },
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{mpsc, Semaphore};

/// System message id a node's heartbeat announcements travel under.
/// Never dispatched to application code; handled entirely inside
/// [`Node::handle_system`].
const HEARTBEAT_MSG_ID: &str = "__Heartbeat__";

/// How often the timer thread re-scans the correlator and every hosted
/// stage's timer wheel for due entries (spec §5's "timer thread").
const TIMER_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// The weight a node announces itself with. This crate doesn't expose a
/// config knob for it; an embedder that needs weighted selection can
/// call `registry().upsert(..)` directly with a custom `ServerInfo`.
const NODE_WEIGHT: i32 = 1;

/// Builds a fresh stage handler for a `stageType` named in a
/// `CreateStage`/`GetOrCreateStage` request. Registered per type via
/// [`Node::register_stage_type`].
pub type StageFactory = Arc<dyn Fn() -> Box<dyn StageHandler> + Send + Sync>;

/// The reply payload a `CreateStage`/`GetOrCreateStage` request gets
/// back (spec §4.3): whether a stage with that id now exists, and
/// whether this call was the one that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStageResult {
    pub result: bool,
    pub is_created: bool,
}

struct LoopHandles {
    inbound_shutdown: mpsc::Sender<()>,
    heartbeat_shutdown: mpsc::Sender<()>,
    timer_shutdown: mpsc::Sender<()>,
}

/// A [`Transport`] decorator that short-circuits sends addressed to this
/// node's own [`Nid`], handing the packet straight back into the
/// node's inbound pipeline instead of round-tripping it through the
/// router socket (spec §9's open question on self-messaging: "may
/// require either a loopback short-circuit or binding to an addressable
/// local endpoint"). `route::router` stays a pure decision table; this
/// is the side-effecting half, living where the other side-effecting
/// routing already lives, on `Node`.
struct LoopbackTransport {
    nid: Nid,
    inner: Arc<dyn Transport>,
    loop_tx: mpsc::Sender<Inbound>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, nid: &Nid, header: RouteHeader, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        if *nid == self.nid {
            let inbound = Inbound { from: header.from.clone(), header, payload };
            return self.loop_tx.send(inbound).await.map_err(|_| PlayHouseError::ShuttingDown);
        }
        self.inner.send(nid, header, payload).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

/// Constructs a [`Node`] with explicit, chainable overrides (mirrors
/// [`PlayHouseConfig`]'s own chainable-setter style rather than a
/// generated builder crate).
pub struct NodeBuilder {
    config: PlayHouseConfig,
    clock: Arc<dyn Clock>,
    api_dispatcher: Option<Arc<ApiDispatcher>>,
    session_node: bool,
    compute_pool_size: usize,
    io_pool_size: usize,
    mailbox_capacity: usize,
    inbound_capacity: usize,
}

impl NodeBuilder {
    fn new(config: PlayHouseConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            api_dispatcher: None,
            session_node: false,
            compute_pool_size: num_cpus::get(),
            io_pool_size: 100,
            mailbox_capacity: 256,
            inbound_capacity: 1024,
        }
    }

    /// Override the clock used for request timeouts, registry aging,
    /// and stage timers. Tests substitute a [`crate::clock::TestClock`]
    /// here; production nodes leave the default [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a built [`ApiDispatcher`], making this an API node. A node
    /// without one replies `NotRouted` to any packet that would
    /// otherwise dispatch to it.
    pub fn api_dispatcher(mut self, dispatcher: ApiDispatcher) -> Self {
        self.api_dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Attach a [`SessionBridge`], making this a Session node.
    pub fn session_node(mut self) -> Self {
        self.session_node = true;
        self
    }

    /// Size of the compute pool bounding concurrently-running API
    /// handler chains (spec §5). Defaults to `num_cpus::get()`.
    pub fn compute_pool_size(mut self, n: usize) -> Self {
        self.compute_pool_size = n;
        self
    }

    /// Size of the I/O pool bounding `AsyncBlock` `pre` bodies (spec
    /// §4.6, §5). Defaults to 100.
    pub fn io_pool_size(mut self, n: usize) -> Self {
        self.io_pool_size = n;
        self
    }

    /// Mailbox capacity each hosted stage's [`crate::stage::StageExecutor`]
    /// is built with.
    pub fn mailbox_capacity(mut self, n: usize) -> Self {
        self.mailbox_capacity = n;
        self
    }

    /// Capacity of the channel the router socket's receive thread
    /// forwards decoded frames through.
    pub fn inbound_capacity(mut self, n: usize) -> Self {
        self.inbound_capacity = n;
        self
    }

    /// Bind the router socket and wire every collaborator together.
    /// Does not yet spawn the background loops; call [`Node::start`]
    /// once the node's stage types (or API controllers) are registered.
    pub fn build(self) -> Result<Arc<Node>, PlayHouseError> {
        let nid = self.config.nid();

        let router_config = RouterSocketConfig {
            bind_endpoint: self.config.bind_endpoint.clone(),
            send_hwm: self.config.send_hwm,
            receive_hwm: self.config.receive_hwm,
            linger_ms: self.config.linger_ms,
            tcp_keepalive_secs: self.config.tcp_keepalive_secs,
        };
        let (router_socket, router_inbound) = RouterSocket::spawn(nid.clone(), router_config, self.inbound_capacity)?;

        let (loopback_tx, loopback_rx) = mpsc::channel(self.inbound_capacity);
        let router_transport: Arc<dyn Transport> = router_socket.clone();
        let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport {
            nid: nid.clone(),
            inner: router_transport,
            loop_tx: loopback_tx,
        });

        let registry = Arc::new(ServiceRegistry::new(
            self.clock.clone(),
            Duration::from_millis(self.config.liveness_timeout_ms),
            Duration::from_millis(self.config.purge_timeout_ms),
        ));
        let correlator = Arc::new(Correlator::new());
        let sender = Arc::new(Sender::new(
            nid.clone(),
            transport,
            registry.clone(),
            correlator.clone(),
            self.clock.clone(),
            Duration::from_millis(self.config.request_timeout_ms),
        ));

        let session_bridge = if self.session_node { Some(Arc::new(SessionBridge::new(nid.clone()))) } else { None };

        Ok(Arc::new(Node {
            nid,
            config: self.config,
            sender,
            registry,
            correlator,
            clock: self.clock,
            router_socket,
            compute_semaphore: Arc::new(Semaphore::new(self.compute_pool_size.max(1))),
            io_semaphore: Arc::new(Semaphore::new(self.io_pool_size.max(1))),
            stages: Arc::new(DashMap::new()),
            stage_factories: Arc::new(DashMap::new()),
            api_dispatcher: self.api_dispatcher,
            session_bridge,
            mailbox_capacity: self.mailbox_capacity,
            inbound_feeds: Mutex::new(Some((router_inbound, loopback_rx))),
            loops: Mutex::new(None),
        }))
    }
}

/// The top-level owner of one cluster member: a router socket, a
/// registry, a correlator, and whichever of a stage host, an API
/// dispatcher, or a session bridge its [`crate::identity::ServiceKind`]
/// calls for.
pub struct Node {
    nid: Nid,
    config: PlayHouseConfig,
    sender: Arc<Sender>,
    registry: Arc<ServiceRegistry>,
    correlator: Arc<Correlator>,
    clock: Arc<dyn Clock>,
    router_socket: Arc<RouterSocket>,
    compute_semaphore: Arc<Semaphore>,
    io_semaphore: Arc<Semaphore>,
    stages: Arc<DashMap<i64, StageHandle>>,
    stage_factories: Arc<DashMap<String, StageFactory>>,
    api_dispatcher: Option<Arc<ApiDispatcher>>,
    session_bridge: Option<Arc<SessionBridge>>,
    mailbox_capacity: usize,
    inbound_feeds: Mutex<Option<(mpsc::Receiver<Inbound>, mpsc::Receiver<Inbound>)>>,
    loops: Mutex<Option<LoopHandles>>,
}

impl Node {
    /// Begin building a node bound to `config.bind_endpoint`.
    pub fn builder(config: PlayHouseConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    pub fn nid(&self) -> &Nid {
        &self.nid
    }

    pub fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn session_bridge(&self) -> Option<&Arc<SessionBridge>> {
        self.session_bridge.as_ref()
    }

    pub fn io_semaphore(&self) -> &Arc<Semaphore> {
        &self.io_semaphore
    }

    /// Register the factory used to construct a fresh stage whenever a
    /// `CreateStage`/`GetOrCreateStage` request names `stage_type` and
    /// this node doesn't already host that stage id. Only meaningful on
    /// a Play node; harmless to call on any other kind.
    pub fn register_stage_type(&self, stage_type: impl Into<String>, factory: StageFactory) {
        self.stage_factories.insert(stage_type.into(), factory);
    }

    /// Dial a peer so sends addressed to it stop failing with
    /// `PeerUnreachable` (ROUTER sockets dial lazily; this just does it
    /// up front).
    pub async fn connect_peer(&self, endpoint: &str) -> Result<(), PlayHouseError> {
        self.router_socket.connect_peer(endpoint).await
    }

    /// Dial `endpoint` and seed the registry with `nid` immediately,
    /// rather than waiting for that peer's first heartbeat to arrive.
    /// Useful for bootstrapping a small fixed cluster from known seed
    /// addresses.
    pub async fn add_peer(&self, nid: Nid, endpoint: impl Into<String>) -> Result<(), PlayHouseError> {
        let endpoint = endpoint.into();
        self.router_socket.connect_peer(&endpoint).await?;
        self.registry.upsert(ServerInfo {
            service_id: nid.service_id,
            nid,
            endpoint,
            server_type: String::new(),
            state: ServerState::Running,
            weight: NODE_WEIGHT,
            timestamp_ms: now_unix_ms(),
        });
        Ok(())
    }

    /// Spawn the transport receive loop, the heartbeat loop, and the
    /// timer thread. Fails with `InternalError` if called more than
    /// once on the same node.
    pub async fn start(self: &Arc<Self>) -> Result<(), PlayHouseError> {
        let feeds = self
            .inbound_feeds
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PlayHouseError::InternalError("node already started".to_string()))?;
        let (router_inbound, loopback_rx) = feeds;

        let (inbound_shutdown_tx, inbound_shutdown_rx) = mpsc::channel(1);
        let (heartbeat_shutdown_tx, heartbeat_shutdown_rx) = mpsc::channel(1);
        let (timer_shutdown_tx, timer_shutdown_rx) = mpsc::channel(1);

        {
            let mut loops = self.loops.lock().unwrap();
            *loops = Some(LoopHandles {
                inbound_shutdown: inbound_shutdown_tx,
                heartbeat_shutdown: heartbeat_shutdown_tx,
                timer_shutdown: timer_shutdown_tx,
            });
        }

        let inbound_node = self.clone();
        tokio::spawn(async move {
            inbound_node.run_inbound_loop(router_inbound, loopback_rx, inbound_shutdown_rx).await;
        });

        let heartbeat_config = HeartbeatConfig {
            interval: Duration::from_millis(self.config.heartbeat_interval_ms),
            liveness_timeout: Duration::from_millis(self.config.liveness_timeout_ms),
            purge_timeout: Duration::from_millis(self.config.purge_timeout_ms),
        };
        let heartbeat_transport: Arc<dyn HeartbeatTransport> = self.clone();
        let announce_nid = self.nid.clone();
        let announce_endpoint = self.config.bind_endpoint.clone();
        let announce_server_type = self.config.service_kind.to_string();
        tokio::spawn(heartbeat::run(
            self.registry.clone(),
            heartbeat_transport,
            self.clock.clone(),
            heartbeat_config,
            move || {
                heartbeat::self_announcement(
                    announce_nid.clone(),
                    announce_endpoint.clone(),
                    announce_server_type.clone(),
                    NODE_WEIGHT,
                    now_unix_ms(),
                )
            },
            heartbeat_shutdown_rx,
        ));

        let timer_stages = self.stages.clone();
        let timer_correlator = self.correlator.clone();
        let timer_clock = self.clock.clone();
        tokio::spawn(run_timer_loop(timer_stages, timer_correlator, timer_clock, TIMER_TICK_INTERVAL, timer_shutdown_rx));

        log::info!("{} started as a {} node", self.nid, self.config.service_kind);
        Ok(())
    }

    /// Close every hosted stage, cancel all pending correlated
    /// requests, stop the background loops, and tear down the router
    /// socket.
    pub async fn shutdown(&self) {
        let loops = self.loops.lock().unwrap().take();
        if let Some(loops) = loops {
            let _ = loops.inbound_shutdown.send(()).await;
            let _ = loops.heartbeat_shutdown.send(()).await;
            let _ = loops.timer_shutdown.send(()).await;
        }

        for entry in self.stages.iter() {
            let _ = entry.value().close().await;
        }
        self.stages.clear();

        self.correlator.cancel_all();
        self.router_socket.shutdown().await;
        log::info!("{} shut down", self.nid);
    }

    async fn run_inbound_loop(
        self: Arc<Self>,
        mut router_inbound: mpsc::Receiver<Inbound>,
        mut loopback: mpsc::Receiver<Inbound>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                maybe = router_inbound.recv() => {
                    match maybe {
                        Some(inbound) => self.handle_inbound(inbound).await,
                        None => {
                            log::warn!("{} router inbound channel closed, stopping inbound loop", self.nid);
                            break;
                        }
                    }
                }
                maybe = loopback.recv() => {
                    if let Some(inbound) = maybe {
                        self.handle_inbound(inbound).await;
                    }
                }
                _ = shutdown.recv() => {
                    log::info!("{} inbound loop shutting down", self.nid);
                    break;
                }
            }
        }
    }

    async fn handle_inbound(&self, inbound: Inbound) {
        let Inbound { from: _from, header, payload } = inbound;
        let packet = RoutePacket::new(header.clone(), payload);

        match router::resolve(&header, self) {
            RouteTarget::Correlator => {
                if !self.correlator.complete(header.msg_seq, packet) {
                    log::debug!("{} dropping reply for unknown or expired msgSeq {}", self.nid, header.msg_seq);
                }
            }
            RouteTarget::SystemHandler => self.handle_system(header, packet).await,
            RouteTarget::ToClient(sid) => self.handle_to_client(header, sid, packet).await,
            RouteTarget::LocalStage(stage_id) => self.handle_local_stage(header, stage_id, packet).await,
            RouteTarget::RemoteStage(stage_id) => self.handle_remote_stage(header, stage_id).await,
            RouteTarget::ApiDispatch => self.handle_api_dispatch(header, packet).await,
        }
    }

    async fn handle_to_client(&self, header: RouteHeader, sid: i64, packet: RoutePacket) {
        let Some(bridge) = &self.session_bridge else {
            log::warn!("{} received a ToClient packet but has no session bridge", self.nid);
            return;
        };
        let frame = SessionBridge::to_server_frame(&header, packet.payload().to_vec());
        if let Err(err) = bridge.deliver_to_client(sid, frame).await {
            log::info!("{} could not deliver to sid {}: {}", self.nid, sid, err);
        }
    }

    async fn handle_local_stage(&self, header: RouteHeader, stage_id: i64, packet: RoutePacket) {
        let handle = self.stages.get(&stage_id).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => {
                if let Err(err) = handle.dispatch(header.clone(), packet).await {
                    log::warn!("{} stage {} dispatch failed: {}", self.nid, stage_id, err);
                    if header.msg_seq != 0 {
                        let _ = self.sender.reply(&header, err.code(), Vec::new()).await;
                    }
                }
            }
            None => {
                log::warn!("{} has no stage {} hosted (race with CreateStage, or it already closed)", self.nid, stage_id);
                if header.msg_seq != 0 {
                    let _ = self.sender.reply(&header, PlayHouseError::NotRouted.code(), Vec::new()).await;
                }
            }
        }
    }

    /// The registry tracks cluster members, not which node hosts which
    /// individual stage id, so there's no directory to consult to
    /// forward this on the original sender's behalf. Arriving here means
    /// the sender's own routing decision was stale; the honest answer is
    /// `NotRouted`, not a best-effort guess.
    async fn handle_remote_stage(&self, header: RouteHeader, stage_id: i64) {
        log::warn!("{} does not host stage {} and has no directory to forward through", self.nid, stage_id);
        if header.msg_seq != 0 {
            let _ = self.sender.reply(&header, PlayHouseError::NotRouted.code(), Vec::new()).await;
        }
    }

    async fn handle_api_dispatch(&self, header: RouteHeader, packet: RoutePacket) {
        match &self.api_dispatcher {
            Some(dispatcher) => {
                let _permit = self.compute_semaphore.acquire().await.ok();
                let ctx: ApiSender = crate::sender::DispatchContext::new(header, self.sender.clone());
                let _ = dispatcher.dispatch(ctx, packet).await;
            }
            None => {
                log::warn!("{} has no API dispatcher registered", self.nid);
                if header.msg_seq != 0 {
                    let _ = self.sender.reply(&header, PlayHouseError::NotRouted.code(), Vec::new()).await;
                }
            }
        }
    }

    async fn handle_system(&self, header: RouteHeader, packet: RoutePacket) {
        if header.is_base {
            self.handle_create_or_get_stage(header, packet).await;
            return;
        }
        if header.msg_id == HEARTBEAT_MSG_ID {
            match serde_json::from_slice::<ServerInfo>(packet.payload()) {
                Ok(info) => heartbeat::apply_received(&self.registry, info),
                Err(err) => log::warn!("{} received a malformed heartbeat packet: {}", self.nid, err),
            }
            return;
        }
        log::warn!("{} received an unrecognized system message {:?}", self.nid, header.msg_id);
        if header.msg_seq != 0 {
            let _ = self.sender.reply(&header, PlayHouseError::NotRouted.code(), Vec::new()).await;
        }
    }

    async fn handle_create_or_get_stage(&self, header: RouteHeader, packet: RoutePacket) {
        let stage_id = header.stage_id;
        let stage_type = if header.account_id.is_empty() {
            self.config.default_stage_type.clone()
        } else {
            header.account_id.clone()
        };
        let is_get_or_create = header.msg_id != "CreateStage";

        if self.stages.contains_key(&stage_id) {
            if is_get_or_create {
                self.reply_stage_result(&header, true, false).await;
            } else {
                log::info!("{} refusing CreateStage for already-hosted stage {}", self.nid, stage_id);
                self.reply_stage_result(&header, false, false).await;
            }
            return;
        }

        let factory = self.stage_factories.get(&stage_type).map(|entry| entry.value().clone());
        let Some(factory) = factory else {
            log::warn!("{} has no stage factory registered for type {:?}", self.nid, stage_type);
            if header.msg_seq != 0 {
                let _ = self.sender.reply(&header, PlayHouseError::NotRouted.code(), Vec::new()).await;
            }
            return;
        };

        let create_payload = packet.payload().to_vec();
        let handler = factory();
        let (executor, handle) = StageExecutorArgs {
            stage_id,
            handler,
            sender: self.sender.clone(),
            authenticate_message_id: self.config.authenticate_message_id.clone(),
            io_semaphore: self.io_semaphore.clone(),
            clock: self.clock.clone(),
            mailbox_capacity: self.mailbox_capacity,
        }
        .build();
        self.stages.insert(stage_id, handle);
        tokio::spawn(executor.run(create_payload));

        self.reply_stage_result(&header, true, true).await;
    }

    async fn reply_stage_result(&self, header: &RouteHeader, result: bool, is_created: bool) {
        if header.msg_seq == 0 {
            return;
        }
        let payload = serde_json::to_vec(&CreateStageResult { result, is_created }).unwrap_or_default();
        let _ = self.sender.reply(header, 0, payload).await;
    }
}

/// Just a named bundle for `StageExecutor::new`'s argument list, so
/// `handle_create_or_get_stage` doesn't read as a six-deep positional
/// call at the point it actually matters.
struct StageExecutorArgs {
    stage_id: i64,
    handler: Box<dyn StageHandler>,
    sender: Arc<Sender>,
    authenticate_message_id: String,
    io_semaphore: Arc<Semaphore>,
    clock: Arc<dyn Clock>,
    mailbox_capacity: usize,
}

impl StageExecutorArgs {
    fn build(self) -> (crate::stage::StageExecutor, StageHandle) {
        crate::stage::StageExecutor::new(
            self.stage_id,
            self.handler,
            self.sender,
            self.authenticate_message_id,
            self.io_semaphore,
            self.clock,
            self.mailbox_capacity,
        )
    }
}

impl LocalRouting for Node {
    fn is_session_node(&self) -> bool {
        self.session_bridge.is_some()
    }

    fn hosts_stage(&self, stage_id: i64) -> bool {
        self.stages.contains_key(&stage_id)
    }
}

#[async_trait]
impl HeartbeatTransport for Node {
    async fn broadcast(&self, info: &ServerInfo) {
        let payload = match serde_json::to_vec(info) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("{} failed to serialize its own heartbeat: {}", self.nid, err);
                return;
            }
        };
        for member in self.registry.snapshot() {
            if member.nid == self.nid {
                continue;
            }
            let mut header = RouteHeader::new(self.nid.clone(), HEARTBEAT_MSG_ID);
            header.is_system = true;
            if let Err(err) = self.router_socket.send(&member.nid, header, payload.clone()).await {
                log::debug!("{} could not reach {} with a heartbeat: {}", self.nid, member.nid, err);
            }
        }
    }
}

async fn run_timer_loop(
    stages: Arc<DashMap<i64, StageHandle>>,
    correlator: Arc<Correlator>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now();
                correlator.expire(now);
                for entry in stages.iter() {
                    let handle = entry.value().clone();
                    for id in handle.due_timers(now) {
                        let _ = handle.timer_tick(id).await;
                    }
                }
            }
            _ = shutdown.recv() => {
                log::info!("timer loop shutting down");
                break;
            }
        }
    }
}

fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
