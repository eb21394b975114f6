// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The stage executor (spec §4.6): one mailbox, one dispatch cycle at a
//! time, driving both stage-level dispatch and the actors joined to it.
//!
//! Grounded on `app/stage/mod.rs`'s `Stage<C>` — a single-owner loop
//! reacting to one `StageEvent` at a time off a channel — generalized
//! here from the teacher's fixed reporter cycle to an arbitrary mailbox
//! of dispatch/timer/async-result/lifecycle entries, per spec §4.6's
//! broader entry set.

use crate::{
    clock::Clock,
    error::PlayHouseError,
    route::{
        header::RouteHeader,
        packet::RoutePacket,
    },
    sender::{
        DispatchContext,
        Sender,
    },
    stage::{
        actor::{
            Actor,
            ActorHandler,
        },
        async_block::PostCallback,
        timer::{
            TimerId,
            TimerWheel,
        },
    },
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::sync::{
    mpsc,
    Semaphore,
};

/// The well-known system `msgId` a session bridge sends when a client
/// leaves a stage (spec §9's resolved "reply before destroy" ordering).
pub const LEAVE_STAGE_MSG_ID: &str = "LeaveStage";

/// A timer's application callback, boxed so many distinctly-typed
/// closures can live in one map. Takes the firing [`DispatchContext`]
/// and returns a boxed future, mirroring how `async fn` trait methods
/// are themselves represented once boxed by `async-trait`.
pub type TimerCallback = Arc<dyn Fn(DispatchContext) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Entries a stage's mailbox carries (spec §4.6). Processed strictly
/// FIFO, one at a time.
pub enum MailboxEntry {
    /// Client-originated dispatch, an inter-stage message, or an API
    /// reply, already resolved to this stage by the router.
    Dispatch { header: RouteHeader, packet: RoutePacket },
    /// The client connection behind `sid` came up or went down.
    ConnectionChanged { sid: i64, connected: bool },
    /// A timer fired; `TimerId` identifies which one (spec §4.6:
    /// ticks are enqueued, never invoked directly from the wheel).
    TimerTick(TimerId),
    /// An `AsyncBlock`'s `pre` finished; invoking this runs `post`.
    Post(PostCallback),
    /// Begin closing this stage (`CloseStage`).
    Close,
}

struct TimerState {
    wheel: TimerWheel,
    callbacks: HashMap<TimerId, TimerCallback>,
}

/// A shared handle onto one stage's timer wheel. Cloned into every
/// [`DispatchContext`] built for that stage so application code can
/// register/cancel timers from inside a dispatch without the executor
/// handing out `&mut self` to a handler it is itself awaiting.
///
/// The `Mutex` is never contended in practice: only the stage's own
/// task ever calls through this handle (the executor while processing
/// `TimerTick`, and handler code invoked from within that same task's
/// dispatch). It exists to let multiple `DispatchContext` clones share
/// the wheel safely, not to guard against real concurrent access.
#[derive(Clone)]
pub struct StageTimers(Arc<Mutex<TimerState>>);

impl StageTimers {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(TimerState {
            wheel: TimerWheel::new(),
            callbacks: HashMap::new(),
        })))
    }

    fn add_repeat(&self, now: std::time::Instant, initial_delay: Duration, period: Duration, callback: TimerCallback) -> TimerId {
        let mut state = self.0.lock().unwrap();
        let id = state.wheel.add_repeat(now, initial_delay, period);
        state.callbacks.insert(id, callback);
        id
    }

    fn add_count(&self, now: std::time::Instant, initial_delay: Duration, period: Duration, count: u32, callback: TimerCallback) -> TimerId {
        let mut state = self.0.lock().unwrap();
        let id = state.wheel.add_count(now, initial_delay, period, count);
        state.callbacks.insert(id, callback);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.0.lock().unwrap();
        state.callbacks.remove(&id);
        state.wheel.cancel(id)
    }

    fn cancel_all(&self) {
        let mut state = self.0.lock().unwrap();
        state.wheel.cancel_all();
        state.callbacks.clear();
    }

    /// Called by the node's timer thread (spec §5) once per tick for
    /// every stage it hosts.
    pub fn due(&self, now: std::time::Instant) -> Vec<TimerId> {
        self.0.lock().unwrap().wheel.due(now)
    }

    fn is_cancelled(&self, id: TimerId) -> bool {
        self.0.lock().unwrap().wheel.is_cancelled(id)
    }

    fn callback(&self, id: TimerId) -> Option<TimerCallback> {
        self.0.lock().unwrap().callbacks.get(&id).cloned()
    }
}

/// What a [`DispatchContext`] needs to reach back into its owning
/// stage: the mailbox to enqueue `Post`/`TimerTick` entries onto, the
/// shared timer wheel, and the I/O pool semaphore `AsyncBlock.pre`
/// bodies run under.
#[derive(Clone)]
pub struct StageLink {
    pub mailbox: mpsc::Sender<MailboxEntry>,
    pub timers: StageTimers,
    pub io_semaphore: Arc<Semaphore>,
}

/// Stage-level (non-actor) hooks: `OnCreate`, dispatch for packets not
/// bound to any client `sid` (inter-stage messages, `CreateStage`
/// system replies), and a factory for the per-client [`Actor`] a new
/// `sid` joining this stage gets.
#[async_trait]
pub trait StageHandler: Send {
    /// Runs once, before the stage is `Running`. Failure closes the
    /// stage without ever accepting a dispatch (spec §4.6 state
    /// diagram: `Initializing --OnCreate fail--> Closed`).
    async fn on_create(&mut self, ctx: &DispatchContext, payload: &[u8]) -> Result<(), PlayHouseError>;

    /// Dispatch for a packet with no client `sid` bound.
    async fn on_dispatch(&mut self, ctx: &DispatchContext, packet: RoutePacket) -> Result<(), PlayHouseError>;

    /// Runs once, while transitioning `Closing -> Closed`, after every
    /// actor has already been destroyed.
    async fn on_close(&mut self, _ctx: &DispatchContext) {}

    /// Build the actor for a newly-seen client `sid`. Called the first
    /// time a `Dispatch` entry names a `sid` this stage hasn't joined
    /// yet.
    fn create_actor(&self, sid: i64) -> Box<dyn ActorHandler>;
}

/// A lifecycle state from spec §4.6's diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Initializing,
    Running,
    Closing,
    Closed,
}

/// A cheap, cloneable way for the rest of the node to address a stage
/// without holding the executor itself.
#[derive(Clone)]
pub struct StageHandle {
    stage_id: i64,
    mailbox: mpsc::Sender<MailboxEntry>,
    timers: StageTimers,
}

impl StageHandle {
    /// This stage's id.
    pub fn stage_id(&self) -> i64 {
        self.stage_id
    }

    /// Timers due at `now`, for the node's timer thread (spec §5) to
    /// turn into [`Self::timer_tick`] calls. Reading due timers does not
    /// require going through the mailbox: the wheel itself is cheap to
    /// consult from any thread, only *firing* one is a mailbox affair.
    pub fn due_timers(&self, now: std::time::Instant) -> Vec<TimerId> {
        self.timers.due(now)
    }

    /// Enqueue an inbound packet. `Err(StageClosed)` if the stage's
    /// mailbox has already been torn down.
    pub async fn dispatch(&self, header: RouteHeader, packet: RoutePacket) -> Result<(), PlayHouseError> {
        self.mailbox
            .send(MailboxEntry::Dispatch { header, packet })
            .await
            .map_err(|_| PlayHouseError::StageClosed)
    }

    /// Notify the stage that `sid`'s connection state changed.
    pub async fn connection_changed(&self, sid: i64, connected: bool) -> Result<(), PlayHouseError> {
        self.mailbox
            .send(MailboxEntry::ConnectionChanged { sid, connected })
            .await
            .map_err(|_| PlayHouseError::StageClosed)
    }

    /// `CloseStage`.
    pub async fn close(&self) -> Result<(), PlayHouseError> {
        self.mailbox.send(MailboxEntry::Close).await.map_err(|_| PlayHouseError::StageClosed)
    }

    /// Enqueue a fired timer's id. Called by the node's timer thread
    /// for every id [`StageTimers::due`] returns.
    pub async fn timer_tick(&self, id: TimerId) -> Result<(), PlayHouseError> {
        self.mailbox.send(MailboxEntry::TimerTick(id)).await.map_err(|_| PlayHouseError::StageClosed)
    }
}

/// The owner of one stage's mailbox, actors, and timers. Runs as a
/// single `tokio` task for the stage's whole lifetime.
pub struct StageExecutor {
    stage_id: i64,
    state: StageState,
    mailbox_rx: mpsc::Receiver<MailboxEntry>,
    mailbox_tx: mpsc::Sender<MailboxEntry>,
    actors: HashMap<i64, Actor>,
    timers: StageTimers,
    handler: Box<dyn StageHandler>,
    sender: Arc<Sender>,
    authenticate_message_id: String,
    io_semaphore: Arc<Semaphore>,
    clock: Arc<dyn Clock>,
}

impl StageExecutor {
    /// Build an executor and the handle used to address it. The
    /// executor does not start running until [`Self::run`] is spawned.
    pub fn new(
        stage_id: i64,
        handler: Box<dyn StageHandler>,
        sender: Arc<Sender>,
        authenticate_message_id: String,
        io_semaphore: Arc<Semaphore>,
        clock: Arc<dyn Clock>,
        mailbox_capacity: usize,
    ) -> (Self, StageHandle) {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(mailbox_capacity);
        let timers = StageTimers::new();
        let handle = StageHandle {
            stage_id,
            mailbox: mailbox_tx.clone(),
            timers: timers.clone(),
        };
        let executor = Self {
            stage_id,
            state: StageState::Initializing,
            mailbox_rx,
            mailbox_tx,
            actors: HashMap::new(),
            timers,
            handler,
            sender,
            authenticate_message_id,
            io_semaphore,
            clock,
        };
        (executor, handle)
    }

    fn stage_link(&self) -> StageLink {
        StageLink {
            mailbox: self.mailbox_tx.clone(),
            timers: self.timers.clone(),
            io_semaphore: self.io_semaphore.clone(),
        }
    }

    fn system_header(&self) -> RouteHeader {
        let mut header = RouteHeader::new(self.sender.nid().clone(), "StageLifecycle");
        header.stage_id = self.stage_id;
        header
    }

    fn context_for(&self, header: RouteHeader) -> DispatchContext {
        DispatchContext::with_stage(header, self.sender.clone(), self.stage_link())
    }

    /// Current lifecycle state, for tests and admin surfaces.
    pub fn state(&self) -> StageState {
        self.state
    }

    /// Run `OnCreate`, then process the mailbox until `Close` drains it
    /// and the stage reaches `Closed`. Consumes `self`: once this
    /// future resolves the stage is gone.
    pub async fn run(mut self, create_payload: Vec<u8>) {
        let create_ctx = self.context_for(self.system_header());
        match self.handler.on_create(&create_ctx, &create_payload).await {
            Ok(()) => {
                self.state = StageState::Running;
                log::info!("{} stage {} is Running", self.sender.nid(), self.stage_id);
            }
            Err(err) => {
                log::warn!("{} stage {} failed OnCreate: {err}", self.sender.nid(), self.stage_id);
                self.state = StageState::Closed;
                return;
            }
        }

        while let Some(entry) = self.mailbox_rx.recv().await {
            match entry {
                MailboxEntry::Close => {
                    self.begin_closing().await;
                    break;
                }
                other => self.process(other).await,
            }
        }
    }

    async fn process(&mut self, entry: MailboxEntry) {
        match entry {
            MailboxEntry::Dispatch { header, packet } => self.handle_dispatch(header, packet).await,
            MailboxEntry::ConnectionChanged { sid, connected } => self.handle_connection_changed(sid, connected).await,
            MailboxEntry::TimerTick(id) => self.handle_timer_tick(id).await,
            MailboxEntry::Post(callback) => callback(),
            MailboxEntry::Close => unreachable!("Close is handled by the caller before process() is invoked"),
        }
    }

    async fn handle_dispatch(&mut self, header: RouteHeader, packet: RoutePacket) {
        if self.state != StageState::Running {
            if header.msg_seq != 0 {
                let _ = self.sender.reply(&header, PlayHouseError::StageClosed.code(), Vec::new()).await;
            }
            return;
        }

        if header.is_system && header.msg_id == LEAVE_STAGE_MSG_ID && header.sid != 0 {
            self.handle_leave_stage(header).await;
            return;
        }

        let ctx = self.context_for(header.clone());
        let result = if header.sid != 0 {
            if !self.actors.contains_key(&header.sid) {
                let actor_handler = self.handler.create_actor(header.sid);
                self.actors.insert(header.sid, Actor::new(header.sid, actor_handler));
            }
            let actor = self.actors.get_mut(&header.sid).expect("just inserted");
            actor.dispatch(&self.authenticate_message_id, &ctx, packet).await
        } else {
            self.handler.on_dispatch(&ctx, packet).await
        };

        if let Err(err) = result {
            log::warn!("{} stage {} dispatch of {:?} failed: {err}", self.sender.nid(), self.stage_id, ctx.header.msg_id);
            if header.msg_seq != 0 {
                let _ = self.sender.reply(&header, err.code(), Vec::new()).await;
            }
        }
    }

    /// Resolves spec §9's open question: reply to the leaving client
    /// before the actor's `on_destroy` runs, so cleanup work never
    /// delays the disconnect acknowledgement.
    async fn handle_leave_stage(&mut self, header: RouteHeader) {
        if header.msg_seq != 0 {
            let _ = self.sender.reply(&header, 0, Vec::new()).await;
        }
        if let Some(mut actor) = self.actors.remove(&header.sid) {
            let ctx = self.context_for(header);
            actor.destroy(&ctx).await;
        }
    }

    async fn handle_connection_changed(&mut self, sid: i64, connected: bool) {
        if !self.actors.contains_key(&sid) {
            return;
        }
        let ctx = self.context_for(self.system_header());
        let actor = self.actors.get_mut(&sid).expect("checked above");
        actor.connection_changed(&ctx, connected).await;
    }

    async fn handle_timer_tick(&mut self, id: TimerId) {
        if self.timers.is_cancelled(id) {
            return;
        }
        if let Some(callback) = self.timers.callback(id) {
            let ctx = self.context_for(self.system_header());
            callback(ctx).await;
        }
    }

    /// Cancels every timer, destroys every actor, runs `OnClose`, then
    /// best-effort drains whatever is left in the mailbox (replying
    /// `StageClosed` to any request still in it) before marking the
    /// stage `Closed` (spec §5: "closing a stage cancels all its
    /// timers, fails all outstanding `RequestTo*` with `StageClosed`,
    /// drains remaining mailbox entries as best-effort").
    async fn begin_closing(&mut self) {
        self.state = StageState::Closing;
        self.timers.cancel_all();

        let ctx = self.context_for(self.system_header());
        let sids: Vec<i64> = self.actors.keys().copied().collect();
        for sid in sids {
            if let Some(mut actor) = self.actors.remove(&sid) {
                actor.destroy(&ctx).await;
            }
        }
        self.handler.on_close(&ctx).await;

        while let Ok(entry) = self.mailbox_rx.try_recv() {
            if let MailboxEntry::Dispatch { header, .. } = entry {
                if header.msg_seq != 0 {
                    let _ = self.sender.reply(&header, PlayHouseError::StageClosed.code(), Vec::new()).await;
                }
            }
        }

        self.state = StageState::Closed;
        log::info!("{} stage {} is Closed", self.sender.nid(), self.stage_id);
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
        stage::actor::ActorHandler,
        transport::Transport,
    };
    use std::sync::atomic::{
        AtomicU32,
        Ordering,
    };

    #[derive(Default)]
    struct RecordingTransport {
        sent: std::sync::Mutex<Vec<(Nid, RouteHeader, Vec<u8>)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, nid: &Nid, header: RouteHeader, payload: Vec<u8>) -> Result<(), PlayHouseError> {
            self.sent.lock().unwrap().push((nid.clone(), header, payload));
            Ok(())
        }
        async fn shutdown(&self) {}
    }

    fn sender(transport: Arc<RecordingTransport>) -> Arc<Sender> {
        Arc::new(Sender::new(
            Nid::new(1, "play-1"),
            transport,
            Arc::new(ServiceRegistry::new(Arc::new(TestClock::new()), Duration::from_secs(5), Duration::from_secs(60))),
            Arc::new(Correlator::new()),
            Arc::new(TestClock::new()),
            Duration::from_secs(1),
        ))
    }

    struct EchoActor;

    #[async_trait]
    impl ActorHandler for EchoActor {
        async fn on_authenticate(&mut self, _ctx: &DispatchContext, _packet: &RoutePacket) -> Result<String, PlayHouseError> {
            Ok("u1".to_string())
        }
        async fn on_dispatch(&mut self, ctx: &DispatchContext, packet: RoutePacket) -> Result<(), PlayHouseError> {
            ctx.reply(0, packet.payload().to_vec()).await
        }
    }

    struct EchoStage;

    #[async_trait]
    impl StageHandler for EchoStage {
        async fn on_create(&mut self, _ctx: &DispatchContext, _payload: &[u8]) -> Result<(), PlayHouseError> {
            Ok(())
        }
        async fn on_dispatch(&mut self, _ctx: &DispatchContext, _packet: RoutePacket) -> Result<(), PlayHouseError> {
            Ok(())
        }
        fn create_actor(&self, _sid: i64) -> Box<dyn ActorHandler> {
            Box::new(EchoActor)
        }
    }

    fn client_header(sid: i64, msg_id: &str, msg_seq: u16) -> RouteHeader {
        let mut header = RouteHeader::new(Nid::new(2, "session-1"), msg_id);
        header.sid = sid;
        header.stage_id = 12345;
        header.msg_seq = msg_seq;
        header
    }

    #[tokio::test]
    async fn echo_scenario_end_to_end() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender(transport.clone());
        let (executor, handle) = StageExecutor::new(
            12345,
            Box::new(EchoStage),
            sender,
            "Authenticate".to_string(),
            Arc::new(Semaphore::new(10)),
            Arc::new(TestClock::new()),
            16,
        );
        tokio::spawn(executor.run(Vec::new()));

        handle
            .dispatch(client_header(1, "Authenticate", 1), RoutePacket::new(client_header(1, "Authenticate", 1), Vec::new()))
            .await
            .unwrap();
        handle
            .dispatch(client_header(1, "EchoRequest", 2), RoutePacket::new(client_header(1, "EchoRequest", 2), b"Hello".to_vec()))
            .await
            .unwrap();

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let (_, header, payload) = &sent[1];
        assert!(header.is_reply);
        assert_eq!(header.msg_seq, 2);
        assert_eq!(payload, b"Hello");
    }

    #[tokio::test]
    async fn authentication_gate_rejects_before_authenticate() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender(transport.clone());
        let (executor, handle) = StageExecutor::new(
            12345,
            Box::new(EchoStage),
            sender,
            "Authenticate".to_string(),
            Arc::new(Semaphore::new(10)),
            Arc::new(TestClock::new()),
            16,
        );
        tokio::spawn(executor.run(Vec::new()));

        handle
            .dispatch(client_header(1, "EchoRequest", 7), RoutePacket::new(client_header(1, "EchoRequest", 7), b"Hello".to_vec()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (_, header, _) = &sent[0];
        assert_eq!(header.error_code, PlayHouseError::Unauthenticated.code());
    }

    #[tokio::test]
    async fn leave_stage_replies_before_destroy_runs() {
        struct DestroyFlag(Arc<AtomicU32>);

        #[async_trait]
        impl ActorHandler for DestroyFlag {
            async fn on_authenticate(&mut self, _ctx: &DispatchContext, _packet: &RoutePacket) -> Result<String, PlayHouseError> {
                Ok("u1".to_string())
            }
            async fn on_dispatch(&mut self, _ctx: &DispatchContext, _packet: RoutePacket) -> Result<(), PlayHouseError> {
                Ok(())
            }
            async fn on_destroy(&mut self, _ctx: &DispatchContext) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        struct DestroyStage(Arc<AtomicU32>);

        #[async_trait]
        impl StageHandler for DestroyStage {
            async fn on_create(&mut self, _ctx: &DispatchContext, _payload: &[u8]) -> Result<(), PlayHouseError> {
                Ok(())
            }
            async fn on_dispatch(&mut self, _ctx: &DispatchContext, _packet: RoutePacket) -> Result<(), PlayHouseError> {
                Ok(())
            }
            fn create_actor(&self, _sid: i64) -> Box<dyn ActorHandler> {
                Box::new(DestroyFlag(self.0.clone()))
            }
        }

        let destroyed = Arc::new(AtomicU32::new(0));
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender(transport.clone());
        let (executor, handle) = StageExecutor::new(
            12345,
            Box::new(DestroyStage(destroyed.clone())),
            sender,
            "Authenticate".to_string(),
            Arc::new(Semaphore::new(10)),
            Arc::new(TestClock::new()),
            16,
        );
        tokio::spawn(executor.run(Vec::new()));

        handle
            .dispatch(client_header(1, "Authenticate", 1), RoutePacket::new(client_header(1, "Authenticate", 1), Vec::new()))
            .await
            .unwrap();

        let mut leave = client_header(1, LEAVE_STAGE_MSG_ID, 9);
        leave.is_system = true;
        handle.dispatch(leave.clone(), RoutePacket::new(leave, Vec::new())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2); // authenticate reply, then leave reply
        let (_, reply_header, _) = &sent[1];
        assert!(reply_header.is_reply);
        assert_eq!(reply_header.error_code, 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_drains_mailbox_and_fails_pending_requests_with_stage_closed() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = sender(transport.clone());
        let (executor, handle) = StageExecutor::new(
            12345,
            Box::new(EchoStage),
            sender,
            "Authenticate".to_string(),
            Arc::new(Semaphore::new(10)),
            Arc::new(TestClock::new()),
            16,
        );
        tokio::spawn(executor.run(Vec::new()));

        handle.close().await.unwrap();
        handle
            .dispatch(client_header(1, "EchoRequest", 5), RoutePacket::new(client_header(1, "EchoRequest", 5), Vec::new()))
            .await
            .ok(); // may itself fail with StageClosed once the mailbox is gone

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = transport.sent.lock().unwrap();
        if let Some((_, header, _)) = sent.last() {
            assert_eq!(header.error_code, PlayHouseError::StageClosed.code());
        }
    }
}
