// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inter-service senders (spec §4.8): the five operations all
//! application-facing sends converge on, plus `Reply`.
//!
//! Spec §4.6 calls for a thread-local "current header" that `Reply`
//! reads implicitly. Rust's async tasks migrate between worker threads
//! on a multi-threaded `tokio` runtime, so a real OS thread-local would
//! silently stop tracking the right header across an `.await` point.
//! Spec §9 anticipates exactly this and allows passing the header
//! explicitly through dispatch entry points instead; this module takes
//! that option, carrying it in [`DispatchContext`] rather than thread
//! state. See `DESIGN.md` for the recorded decision.
//!
//! Grounded on `app/worker/mod.rs`'s pattern of a shared handle
//! (there, `Worker`) used from many call sites to emit a request and
//! register for its reply; `Sender` plays the same role here for all
//! five send/request operations.

use crate::{
    clock::Clock,
    correlator::{
        self,
        Correlator,
    },
    error::PlayHouseError,
    identity::Nid,
    registry::ServiceRegistry,
    route::{
        header::RouteHeader,
        packet::RoutePacket,
    },
    transport::Transport,
};
use async_trait::async_trait;
use std::{
    sync::Arc,
    time::Duration,
};

/// The current header plus a handle to send on it, passed down through
/// every dispatch entry point (`OnDispatch`, timer/post callbacks,
/// filter chains) instead of read from thread-local state.
///
/// `stage` is `Some` only when this dispatch is running inside a stage
/// cycle (spec §4.6/§4.7): it is what lets application code reach
/// `AddRepeatTimer`/`AddCountTimer`/`CancelTimer`/`AsyncBlock` from
/// inside a handler without those handlers needing a `&mut` reference
/// to the owning [`crate::stage::executor::StageExecutor`], which is
/// impossible to hand out while that very executor is awaiting the
/// handler call. `api` node dispatch contexts leave it `None`.
#[derive(Clone)]
pub struct DispatchContext {
    pub header: RouteHeader,
    pub sender: Arc<Sender>,
    pub stage: Option<crate::stage::executor::StageLink>,
}

impl DispatchContext {
    /// A context with no stage link, for API-node dispatch.
    pub fn new(header: RouteHeader, sender: Arc<Sender>) -> Self {
        Self { header, sender, stage: None }
    }

    /// A context carrying a link back to the owning stage.
    pub fn with_stage(header: RouteHeader, sender: Arc<Sender>, stage: crate::stage::executor::StageLink) -> Self {
        Self { header, sender, stage: Some(stage) }
    }

    /// `Reply(errorCode, payload)` (spec §4.8): valid only because this
    /// type only exists while a dispatch is in progress. A no-op for a
    /// push (`msgSeq == 0`), since there is no requester waiting.
    pub async fn reply(&self, error_code: u16, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        self.sender.reply(&self.header, error_code, payload).await
    }

    /// `AddRepeatTimer(initialDelay, period, fn)`. `None` outside a
    /// stage context.
    pub fn add_repeat_timer(
        &self,
        initial_delay: Duration,
        period: Duration,
        callback: crate::stage::executor::TimerCallback,
    ) -> Option<crate::stage::timer::TimerId> {
        let stage = self.stage.as_ref()?;
        Some(stage.timers.add_repeat(self.sender.clock.now(), initial_delay, period, callback))
    }

    /// `AddCountTimer(initialDelay, period, count, fn)`. `None` outside
    /// a stage context.
    pub fn add_count_timer(
        &self,
        initial_delay: Duration,
        period: Duration,
        count: u32,
        callback: crate::stage::executor::TimerCallback,
    ) -> Option<crate::stage::timer::TimerId> {
        let stage = self.stage.as_ref()?;
        Some(stage.timers.add_count(self.sender.clock.now(), initial_delay, period, count, callback))
    }

    /// `CancelTimer(timerId)`. `false` outside a stage context or for
    /// an already-retired id.
    pub fn cancel_timer(&self, id: crate::stage::timer::TimerId) -> bool {
        self.stage.as_ref().map(|s| s.timers.cancel(id)).unwrap_or(false)
    }

    /// `AsyncBlock(pre, post)` (spec §4.6): runs `pre` on the node's I/O
    /// pool and delivers `post` back onto the owning stage's mailbox. A
    /// no-op outside a stage context.
    pub async fn async_block<T, Pre, Post>(&self, pre: Pre, post: Post)
    where
        T: Send + 'static,
        Pre: FnOnce() -> T + Send + 'static,
        Post: FnOnce(T) + Send + 'static,
    {
        let Some(stage) = self.stage.clone() else {
            return;
        };
        let mailbox = stage.mailbox.clone();
        crate::stage::async_block::spawn(stage.io_semaphore.clone(), pre, post, move |callback| {
            let mailbox = mailbox.clone();
            async move {
                let _ = mailbox.send(crate::stage::executor::MailboxEntry::Post(callback)).await;
            }
        })
        .await;
    }
}

/// Owns everything needed to address and emit packets: this node's own
/// identity, the transport, the registry (for selection policies), and
/// the correlator (for request/reply operations).
pub struct Sender {
    nid: Nid,
    transport: Arc<dyn Transport>,
    registry: Arc<ServiceRegistry>,
    correlator: Arc<Correlator>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
}

impl Sender {
    /// A sender addressing packets as `nid`, with `request_timeout` as
    /// the default deadline for `RequestTo*`/`CreateStage` calls.
    pub fn new(
        nid: Nid,
        transport: Arc<dyn Transport>,
        registry: Arc<ServiceRegistry>,
        correlator: Arc<Correlator>,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            nid,
            transport,
            registry,
            correlator,
            clock,
            request_timeout,
        }
    }

    /// This node's own identity, as stamped on every outbound header.
    pub fn nid(&self) -> &Nid {
        &self.nid
    }

    /// The backing registry, for send sites that need `roundRobin`/`weighted`
    /// selection before addressing a packet (`SendToApi`/`RequestToApi`
    /// "direct or selection policy", spec §4.8).
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    fn outbound(&self, msg_id: impl Into<String>) -> RouteHeader {
        RouteHeader::new(self.nid.clone(), msg_id)
    }

    /// `SendToClient(sid, packet)`: one-way, `isToClient=1`.
    pub async fn send_to_client(&self, session_nid: &Nid, sid: i64, msg_id: impl Into<String>, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        let mut header = self.outbound(msg_id);
        header.is_to_client = true;
        header.sid = sid;
        self.transport.send(session_nid, header, payload).await
    }

    /// `SendToStage(nid, stageId, packet)`: one-way, `stageId` set.
    pub async fn send_to_stage(&self, nid: &Nid, stage_id: i64, msg_id: impl Into<String>, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        let mut header = self.outbound(msg_id);
        header.stage_id = stage_id;
        self.transport.send(nid, header, payload).await
    }

    /// `RequestToStage(nid, stageId, packet)`: awaits a reply.
    pub async fn request_to_stage(&self, nid: &Nid, stage_id: i64, msg_id: impl Into<String>, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        let mut header = self.outbound(msg_id);
        header.stage_id = stage_id;
        self.request(nid, header, payload).await
    }

    /// Forward a client-originated packet to the Play node hosting the
    /// stage it's addressed to, preserving the `sid`/`accountId`/
    /// `stageId`/`msgId` a [`crate::session::SessionBridge`] already
    /// stamped on `header`, but reissuing `msgSeq` under this node's own
    /// correlator — the wire `msgSeq` a client sent is only meaningful
    /// to that client's connection, while inter-node correlation is
    /// scoped per spec §4.5 to the sending node. Returns `None` for a
    /// push (`header.msgSeq == 0` on entry); the caller is expected to
    /// re-stamp a reply's `ServerFrame` with the *original* client
    /// `msgSeq` it held onto, not anything read back off the wire.
    pub async fn forward_to_stage(&self, nid: &Nid, mut header: RouteHeader, payload: Vec<u8>) -> Result<Option<RoutePacket>, PlayHouseError> {
        header.from = self.nid.clone();
        if header.msg_seq == 0 {
            self.transport.send(nid, header, payload).await?;
            return Ok(None);
        }
        self.request(nid, header, payload).await.map(Some)
    }

    /// `SendToApi(nid, packet)`: one-way, `isBackend=1`.
    pub async fn send_to_api(&self, nid: &Nid, msg_id: impl Into<String>, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        let mut header = self.outbound(msg_id);
        header.is_backend = true;
        self.transport.send(nid, header, payload).await
    }

    /// `RequestToApi(nid, packet)`: `isBackend=1`, awaits a reply.
    pub async fn request_to_api(&self, nid: &Nid, msg_id: impl Into<String>, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        let mut header = self.outbound(msg_id);
        header.is_backend = true;
        self.request(nid, header, payload).await
    }

    /// `CreateStage(nid, type, id, payload)`: `isSystem=1,isBase=1`,
    /// awaits a reply carrying `(Result, IsCreated)` (application-defined
    /// payload). An empty `stage_type` falls back to the hosting node's
    /// `default_stage_type`.
    pub async fn create_stage(&self, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        self.create_or_get_stage("CreateStage", nid, stage_type, stage_id, payload).await
    }

    /// `GetOrCreateStage(nid, type, id, payload)`: same flags as
    /// `CreateStage`, but the callee returns `IsCreated=false` if the
    /// stage already existed rather than failing.
    pub async fn get_or_create_stage(&self, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        self.create_or_get_stage("GetOrCreateStage", nid, stage_type, stage_id, payload).await
    }

    async fn create_or_get_stage(&self, msg_id: &'static str, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        let mut header = self.outbound(msg_id);
        header.is_system = true;
        header.is_base = true;
        header.stage_id = stage_id;
        header.account_id = stage_type.to_string();
        self.request(nid, header, payload).await
    }

    async fn request(&self, nid: &Nid, mut header: RouteHeader, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        let (msg_seq, rx) = self.correlator.register(self.clock.now(), self.request_timeout);
        header.msg_seq = msg_seq;
        if let Err(err) = self.transport.send(nid, header, payload).await {
            self.correlator.forget(msg_seq);
            return Err(err);
        }
        correlator::await_reply(rx).await
    }

    /// `Reply(errorCode, packet?)` (spec §4.8): builds the reply header
    /// from `current` (copying `msgSeq` and addressee) and sends it
    /// back to `current.from`. A no-op if `current.msgSeq == 0` — a
    /// push carries no requester to reply to.
    pub async fn reply(&self, current: &RouteHeader, error_code: u16, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        if current.msg_seq == 0 {
            return Ok(());
        }
        let header = current.reply_header(self.nid.clone(), error_code, payload.len() as u32);
        let target = current.from.clone();
        self.transport.send(&target, header, payload).await
    }
}

/// Ergonomic sugar for handlers running inside an API node's dispatch
/// (spec §4.9): thin wrappers over [`Sender`]'s raw operations that
/// don't require a handler to reach through `ctx.sender` and repeat
/// `ctx.header.from` by hand.
#[async_trait]
pub trait ApiSenderExt {
    /// The NID that sent the packet currently being dispatched.
    fn requester(&self) -> &Nid;

    /// `SendToApi(nid, packet)`.
    async fn send_to_api(&self, nid: &Nid, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<(), PlayHouseError>;

    /// `RequestToApi(nid, packet)`.
    async fn request_to_api(&self, nid: &Nid, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError>;

    /// `CreateStage(nid, type, id, payload)`.
    async fn create_stage(&self, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError>;

    /// `GetOrCreateStage(nid, type, id, payload)`.
    async fn get_or_create_stage(&self, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError>;
}

#[async_trait]
impl ApiSenderExt for DispatchContext {
    fn requester(&self) -> &Nid {
        &self.header.from
    }

    async fn send_to_api(&self, nid: &Nid, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        self.sender.send_to_api(nid, msg_id, payload).await
    }

    async fn request_to_api(&self, nid: &Nid, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        self.sender.request_to_api(nid, msg_id, payload).await
    }

    async fn create_stage(&self, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        self.sender.create_stage(nid, stage_type, stage_id, payload).await
    }

    async fn get_or_create_stage(&self, nid: &Nid, stage_type: &str, stage_id: i64, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        self.sender.get_or_create_stage(nid, stage_type, stage_id, payload).await
    }
}

/// Ergonomic sugar for handlers running inside a stage/actor dispatch
/// (spec §4.7, §4.8): the current header already carries the joined
/// client's `sid` and the Session NID it arrived from, so
/// `SendToClient` and the header's own stage/account fields don't need
/// to be threaded through by hand.
#[async_trait]
pub trait StageSenderExt {
    /// The stage this dispatch is running against, or `0` outside a
    /// stage-bound header.
    fn stage_id(&self) -> i64;

    /// The actor's `accountId`, empty before authentication.
    fn account_id(&self) -> &str;

    /// `SendToClient(sid, packet)` addressed at the Session NID and
    /// `sid` this dispatch's header carries (spec §4.8: "via Session
    /// NID bound to this actor").
    async fn send_to_client(&self, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<(), PlayHouseError>;

    /// `SendToStage(nid, stageId, packet)`.
    async fn send_to_stage(&self, nid: &Nid, stage_id: i64, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<(), PlayHouseError>;

    /// `RequestToStage(nid, stageId, packet)`.
    async fn request_to_stage(&self, nid: &Nid, stage_id: i64, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError>;
}

#[async_trait]
impl StageSenderExt for DispatchContext {
    fn stage_id(&self) -> i64 {
        self.header.stage_id
    }

    fn account_id(&self) -> &str {
        &self.header.account_id
    }

    async fn send_to_client(&self, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        self.sender.send_to_client(&self.header.from, self.header.sid, msg_id, payload).await
    }

    async fn send_to_stage(&self, nid: &Nid, stage_id: i64, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<(), PlayHouseError> {
        self.sender.send_to_stage(nid, stage_id, msg_id, payload).await
    }

    async fn request_to_stage(&self, nid: &Nid, stage_id: i64, msg_id: impl Into<String> + Send, payload: Vec<u8>) -> Result<RoutePacket, PlayHouseError> {
        self.sender.request_to_stage(nid, stage_id, msg_id, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Nid, RouteHeader, Vec<u8>)>>,
        reply_with: AsyncMutex<Option<RoutePacket>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, nid: &Nid, header: RouteHeader, payload: Vec<u8>) -> Result<(), PlayHouseError> {
            if self.fail {
                return Err(PlayHouseError::PeerUnreachable);
            }
            self.sent.lock().unwrap().push((nid.clone(), header, payload));
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn sender(transport: Arc<RecordingTransport>) -> (Arc<Sender>, Arc<Correlator>) {
        let correlator = Arc::new(Correlator::new());
        let registry = Arc::new(ServiceRegistry::new(
            Arc::new(TestClock::new()),
            Duration::from_secs(5),
            Duration::from_secs(60),
        ));
        let sender = Arc::new(Sender::new(
            Nid::new(1, "play-1"),
            transport,
            registry,
            correlator.clone(),
            Arc::new(TestClock::new()),
            Duration::from_secs(1),
        ));
        (sender, correlator)
    }

    #[tokio::test]
    async fn send_to_client_sets_is_to_client_and_sid() {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, _correlator) = sender(transport.clone());

        sender
            .send_to_client(&Nid::new(2, "session-1"), 42, "Push", b"hi".to_vec())
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        let (nid, header, payload) = &sent[0];
        assert_eq!(*nid, Nid::new(2, "session-1"));
        assert!(header.is_to_client);
        assert_eq!(header.sid, 42);
        assert_eq!(header.msg_seq, 0);
        assert_eq!(payload, b"hi");
    }

    #[tokio::test]
    async fn create_stage_sets_system_and_base_flags() {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, correlator) = sender(transport.clone());

        let target = Nid::new(1, "play-1");
        let handle = tokio::spawn({
            let sender = sender.clone();
            let target = target.clone();
            async move { sender.create_stage(&target, "TestStage", 99999, Vec::new()).await }
        });

        // give the request time to register before we reply to it.
        tokio::task::yield_now().await;
        let msg_seq = {
            let sent = transport.sent.lock().unwrap();
            let (_, header, _) = &sent[0];
            assert!(header.is_system);
            assert!(header.is_base);
            assert_eq!(header.stage_id, 99999);
            header.msg_seq
        };

        let reply_header = RouteHeader::new(target.clone(), "CreateStage").reply_header(target, 0, 0);
        let mut reply_header = reply_header;
        reply_header.msg_seq = msg_seq;
        assert!(correlator.complete(msg_seq, RoutePacket::new(reply_header, Vec::new())));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.header().error_code, 0);
    }

    #[tokio::test]
    async fn request_forgets_the_correlator_entry_on_send_failure() {
        let transport = Arc::new(RecordingTransport { fail: true, ..Default::default() });
        let (sender, correlator) = sender(transport);

        let err = sender
            .request_to_stage(&Nid::new(1, "play-2"), 1, "Ping", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayHouseError::PeerUnreachable));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn reply_is_a_no_op_for_a_push() {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, _correlator) = sender(transport.clone());

        let push_header = RouteHeader::new(Nid::new(1, "play-1"), "Push");
        sender.reply(&push_header, 0, Vec::new()).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forward_to_stage_reissues_msg_seq_but_keeps_sid_and_account_id() {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, correlator) = sender(transport.clone());

        let mut client_header = RouteHeader::new(Nid::new(3, "session-1"), "EchoRequest");
        client_header.msg_seq = 7; // a client-assigned value, meaningless to this node's correlator
        client_header.sid = 42;
        client_header.stage_id = 12345;
        client_header.account_id = "u1".to_string();

        let target = Nid::new(1, "play-1");
        let handle = tokio::spawn({
            let sender = sender.clone();
            let target = target.clone();
            async move { sender.forward_to_stage(&target, client_header, b"Hello".to_vec()).await }
        });

        tokio::task::yield_now().await;
        let forwarded_msg_seq = {
            let sent = transport.sent.lock().unwrap();
            let (nid, header, payload) = &sent[0];
            assert_eq!(*nid, target);
            assert_eq!(header.sid, 42);
            assert_eq!(header.stage_id, 12345);
            assert_eq!(header.account_id, "u1");
            assert_eq!(header.from, Nid::new(1, "play-1"));
            assert_ne!(header.msg_seq, 7);
            assert_eq!(payload, b"Hello");
            header.msg_seq
        };

        let reply_header = RouteHeader::new(target.clone(), "EchoRequest").reply_header(target, 0, 5);
        let mut reply_header = reply_header;
        reply_header.msg_seq = forwarded_msg_seq;
        assert!(correlator.complete(forwarded_msg_seq, RoutePacket::new(reply_header, b"Hello".to_vec())));

        let reply = handle.await.unwrap().unwrap().expect("a request carries a reply");
        assert_eq!(reply.payload(), b"Hello");
    }

    #[tokio::test]
    async fn forward_to_stage_sends_a_push_without_registering_a_correlator_entry() {
        let transport = Arc::new(RecordingTransport::default());
        let (sender, correlator) = sender(transport.clone());

        let mut client_header = RouteHeader::new(Nid::new(3, "session-1"), "BroadcastTrigger");
        client_header.msg_seq = 0;
        client_header.sid = 42;

        let target = Nid::new(1, "play-1");
        let reply = sender.forward_to_stage(&target, client_header, Vec::new()).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(correlator.pending_count(), 0);
    }
}
