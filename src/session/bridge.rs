// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Session node's bridge between the client wire protocol and
//! `RoutePacket`s (spec §2 "Session bridge"): tracks `sid -> accountId
//! -> stage` bindings and translates decoded [`ClientFrame`]s into
//! outbound [`RouteHeader`]s, and inbound reply/push headers back into
//! [`ServerFrame`]s.
//!
//! The concrete client connector (TLS/WebSocket listener, the actual
//! `read()`/`write()` loop) is an explicit non-goal (spec §1): this
//! module only owns the mapping and the frame translation. A connector
//! the embedder supplies implements [`ClientLink`] and is handed to
//! [`SessionBridge::open_session`]; everything upstream of "decode one
//! `ClientFrame`" and downstream of "encode one `ServerFrame`" is the
//! embedder's concern.
//!
//! Grounded on `app/cluster/mod.rs`'s `Nodes` (a `DashMap` keyed by node
//! identity, refreshed and read from many tasks concurrently) for the
//! shape of a concurrently-accessed directory; the `sid` allocator
//! mirrors `Correlator::next_msg_seq`'s monotonic-counter pattern
//! (`correlator/mod.rs`), widened to `i64` per spec §3's `SID` type.

use crate::{
    error::PlayHouseError,
    identity::Nid,
    route::{
        header::RouteHeader,
        packet::RoutePacket,
    },
    wire::{
        ClientFrame,
        ServerFrame,
    },
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{
    atomic::{
        AtomicI64,
        Ordering,
    },
    Arc,
};

/// What a Session node needs from the concrete client connection to
/// deliver a server frame, or to learn it can no longer be reached.
/// Implemented by the embedder's TLS/WebSocket transport.
#[async_trait]
pub trait ClientLink: Send + Sync {
    /// Deliver one encoded server frame to the client.
    async fn send(&self, frame: ServerFrame);

    /// Close the underlying connection.
    async fn disconnect(&self);
}

/// The `sid -> accountId -> stage` binding spec §2 and §9 describe
/// (modeled as a lookup-by-handle map rather than an ownership graph,
/// per spec §9's cyclic-reference note).
#[derive(Debug, Clone, Default)]
pub struct SessionBinding {
    /// Set once `OnAuthenticate` succeeds for this session's actor.
    pub account_id: String,
    /// The Play node currently hosting this session's stage, once joined.
    pub stage_nid: Option<Nid>,
    /// `0` until the session has joined a stage.
    pub stage_id: i64,
}

/// The Session node's directory of live connections and their bindings.
pub struct SessionBridge {
    /// This Session node's own identity, stamped as `from` on every
    /// outbound header built here.
    nid: Nid,
    next_sid: AtomicI64,
    bindings: DashMap<i64, SessionBinding>,
    links: DashMap<i64, Arc<dyn ClientLink>>,
}

impl SessionBridge {
    /// A bridge addressing outbound headers as `nid`.
    pub fn new(nid: Nid) -> Self {
        Self {
            nid,
            next_sid: AtomicI64::new(1),
            bindings: DashMap::new(),
            links: DashMap::new(),
        }
    }

    /// Register a newly-accepted client connection, returning its
    /// freshly issued `sid` (spec §3: "opaque handle ... issued by the
    /// Session node; scoped to that Session").
    pub fn open_session(&self, link: Arc<dyn ClientLink>) -> i64 {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        self.bindings.insert(sid, SessionBinding::default());
        self.links.insert(sid, link);
        sid
    }

    /// Drop `sid`'s link and binding, returning the binding it had (if
    /// any) so the caller can notify the hosting stage of the
    /// disconnect before it's forgotten.
    pub fn close_session(&self, sid: i64) -> Option<SessionBinding> {
        self.links.remove(&sid);
        self.bindings.remove(&sid).map(|(_, binding)| binding)
    }

    /// Record the `accountId` an actor authenticated as (spec §4.7:
    /// "`AccountId` must be set during `OnAuthenticate`").
    pub fn set_account_id(&self, sid: i64, account_id: impl Into<String>) {
        if let Some(mut binding) = self.bindings.get_mut(&sid) {
            binding.account_id = account_id.into();
        }
    }

    /// Record which stage (and its hosting node) `sid` has joined.
    pub fn bind_stage(&self, sid: i64, stage_nid: Nid, stage_id: i64) {
        if let Some(mut binding) = self.bindings.get_mut(&sid) {
            binding.stage_nid = Some(stage_nid);
            binding.stage_id = stage_id;
        }
    }

    /// A snapshot of `sid`'s current binding, if the session is open.
    pub fn binding(&self, sid: i64) -> Option<SessionBinding> {
        self.bindings.get(&sid).map(|b| b.clone())
    }

    /// True if `sid` is a currently open session.
    pub fn is_open(&self, sid: i64) -> bool {
        self.bindings.contains_key(&sid)
    }

    /// Translate a decoded client frame into the `RoutePacket` it should
    /// be forwarded as, stamping `sid`, the bound `accountId` (empty
    /// before authentication), and `stageId` from the frame.
    pub fn to_route_packet(&self, sid: i64, frame: ClientFrame) -> (RouteHeader, RoutePacket) {
        let account_id = self.binding(sid).map(|b| b.account_id).unwrap_or_default();
        let mut header = RouteHeader::new(self.nid.clone(), frame.msg_id.clone());
        header.msg_seq = frame.msg_seq;
        header.stage_id = frame.stage_id as i64;
        header.account_id = account_id;
        header.sid = sid;
        let packet = RoutePacket::new(header.clone(), frame.payload);
        (header, packet)
    }

    /// Translate an inbound reply or push header back into the
    /// `ServerFrame` the client expects, per spec §4.1's field mapping.
    pub fn to_server_frame(header: &RouteHeader, payload: Vec<u8>) -> ServerFrame {
        ServerFrame {
            msg_id: header.msg_id.clone(),
            msg_seq: header.msg_seq,
            stage_id: header.stage_id as u64,
            error_code: header.error_code,
            payload,
        }
    }

    /// Deliver `frame` to `sid`'s live connection. `Err(NotRouted)` if
    /// the session is no longer open (spec §4.4: "Unknown/duplicate
    /// routings are reported with `NotRouted`").
    pub async fn deliver_to_client(&self, sid: i64, frame: ServerFrame) -> Result<(), PlayHouseError> {
        let link = self.links.get(&sid).map(|l| l.clone());
        match link {
            Some(link) => {
                link.send(frame).await;
                Ok(())
            }
            None => {
                log::info!("dropping frame for closed session {sid}");
                Err(PlayHouseError::NotRouted)
            }
        }
    }
}
