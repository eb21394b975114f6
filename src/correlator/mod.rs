// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The request/reply correlator (spec §4.5): a per-node `msgSeq`
//! generator wrapping at `2^16 - 1` (skipping `0`, which means
//! "push/one-way"), an in-flight map of outstanding requests, and
//! deadline-based expiry.
//!
//! Grounded on `app/worker/mod.rs`'s `Worker` trait, the teacher's
//! request/reply matcher: a CQL request is tagged with a stream id, the
//! worker is stashed in a map keyed by that id, and the matching
//! response (or a timeout) retires the entry exactly once. This module
//! keeps that map-keyed-by-sequence-number shape but replaces the
//! teacher's boxed `on_event`/`handle_error` callback with a
//! [`tokio::sync::oneshot`] responder, since PlayHouse's request sites
//! are `async fn`s awaiting a reply rather than an actor posting
//! callbacks across threads.

use crate::{
    error::PlayHouseError,
    route::packet::RoutePacket,
};
use dashmap::DashMap;
use std::{
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};
use tokio::sync::oneshot;

/// Resolution of a correlated request, delivered exactly once.
#[derive(Debug)]
pub enum CorrelatedReply {
    /// A reply packet matching the request's `msgSeq` arrived.
    Packet(RoutePacket),
    /// No reply arrived before the request's deadline.
    TimedOut,
    /// The node is shutting down with this request still outstanding.
    Cancelled,
}

struct Pending {
    deadline: Instant,
    responder: oneshot::Sender<CorrelatedReply>,
}

/// Generates `msgSeq` values and matches inbound replies to outstanding
/// requests by that sequence number.
///
/// One instance per node: `msgSeq` is scoped to the sending node, not
/// globally unique, so a reply is identified by `(from node, msgSeq)`
/// from the requester's point of view — which is exactly "the
/// correlator that issued this `msgSeq`", i.e. `self`.
pub struct Correlator {
    next_seq: AtomicU32,
    pending: DashMap<u16, Pending>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// An empty correlator with its sequence counter starting at `1`
    /// (`0` is reserved to mean "no reply expected").
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU32::new(1),
            pending: DashMap::new(),
        }
    }

    /// The next `msgSeq`, wrapping `u16::MAX -> 1` rather than through
    /// `0` (spec §4.5: the sequence space wraps at `2^16 - 1`, and `0`
    /// always means "push").
    fn next_msg_seq(&self) -> u16 {
        loop {
            let raw = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let candidate = (raw % (u16::MAX as u32)) as u16 + 1;
            // A wrapped-around sequence number might still be in use by
            // a very long-lived pending request; skip it rather than
            // handing out a duplicate.
            if !self.pending.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Allocate a `msgSeq` and register a waiter for its reply, due by
    /// `now + timeout`. Returns the sequence number to stamp on the
    /// outbound header, and a receiver that resolves exactly once.
    pub fn register(&self, now: Instant, timeout: Duration) -> (u16, oneshot::Receiver<CorrelatedReply>) {
        let msg_seq = self.next_msg_seq();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            msg_seq,
            Pending {
                deadline: now + timeout,
                responder: tx,
            },
        );
        (msg_seq, rx)
    }

    /// Deliver an inbound reply packet. Returns `true` if a waiter was
    /// found (and thus consumed this `msgSeq`); `false` for an unknown
    /// or already-resolved sequence number (a late duplicate, or a
    /// reply for a request this node never made).
    pub fn complete(&self, msg_seq: u16, packet: RoutePacket) -> bool {
        match self.pending.remove(&msg_seq) {
            Some((_, pending)) => {
                let _ = pending.responder.send(CorrelatedReply::Packet(packet));
                true
            }
            None => false,
        }
    }

    /// Retire any pending request whose deadline has passed, delivering
    /// [`CorrelatedReply::TimedOut`] to its waiter. Intended to be
    /// called from the node's timer thread (spec §5) once per tick.
    pub fn expire(&self, now: Instant) {
        let expired: Vec<u16> = self
            .pending
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| *e.key())
            .collect();
        for msg_seq in expired {
            if let Some((_, pending)) = self.pending.remove(&msg_seq) {
                let _ = pending.responder.send(CorrelatedReply::TimedOut);
            }
        }
    }

    /// Retire every pending request as cancelled. Called once during
    /// node shutdown so no caller awaits a reply that will never come.
    pub fn cancel_all(&self) {
        let keys: Vec<u16> = self.pending.iter().map(|e| *e.key()).collect();
        for msg_seq in keys {
            if let Some((_, pending)) = self.pending.remove(&msg_seq) {
                let _ = pending.responder.send(CorrelatedReply::Cancelled);
            }
        }
    }

    /// Count of requests awaiting a reply, for tests and admin surfaces.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop a registered entry without notifying its waiter. Used when
    /// the send that would have produced a reply never went out (the
    /// caller already holds the send error and isn't awaiting the
    /// receiver), so the entry doesn't sit until its deadline for
    /// nothing.
    pub fn forget(&self, msg_seq: u16) {
        self.pending.remove(&msg_seq);
    }
}

/// Await a correlated reply, translating [`CorrelatedReply`] into a
/// `Result` the way a request-site caller wants it.
pub async fn await_reply(rx: oneshot::Receiver<CorrelatedReply>) -> Result<RoutePacket, PlayHouseError> {
    match rx.await {
        Ok(CorrelatedReply::Packet(packet)) => Ok(packet),
        Ok(CorrelatedReply::TimedOut) => Err(PlayHouseError::RequestTimeout),
        Ok(CorrelatedReply::Cancelled) => Err(PlayHouseError::ShuttingDown),
        // The responder was dropped without sending: treat the same as
        // cancellation (can only happen during correlator teardown).
        Err(_) => Err(PlayHouseError::ShuttingDown),
    }
}
