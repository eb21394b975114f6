// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`RoutePacket`]: the inter-node envelope of [`RouteHeader`] plus a
//! pooled [`Payload`] buffer, with exactly-once ownership (spec §3):
//! once handed to a sender or dispatcher the caller may not read it
//! again, `move_payload` transfers the buffer and leaves an empty
//! sentinel behind, and `dispose` is idempotent.
//!
//! Grounded on `app/stage/mod.rs`'s `Reusable` (an `UnsafeCell`-backed
//! reusable send buffer reused across reporter cycles); this module
//! gets the same reuse-don't-reallocate behavior from a safe
//! `Mutex<Vec<Vec<u8>>>` free list instead of unsafe interior
//! mutability, since PlayHouse's payloads cross task boundaries (the
//! teacher's `Reusable` never leaves its owning stage's thread).

use crate::route::header::RouteHeader;
use std::sync::Mutex;

/// A small free list of previously-used buffers, so a busy stage or
/// router doesn't allocate a fresh `Vec` for every packet.
#[derive(Debug, Default)]
pub struct PayloadPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl PayloadPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a buffer from the pool, or allocate a new one if empty.
    pub fn acquire(&self) -> Vec<u8> {
        self.free.lock().unwrap().pop().unwrap_or_default()
    }

    /// Return a buffer to the pool for reuse. Its length is reset but
    /// its capacity is kept.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        // Bound the free list so a single burst of huge payloads
        // doesn't pin that memory forever.
        let mut free = self.free.lock().unwrap();
        if free.len() < 256 {
            free.push(buf);
        }
    }
}

/// A payload buffer. `Default`/empty once its bytes have been moved out
/// or disposed.
#[derive(Debug, Default)]
pub struct Payload(Option<Vec<u8>>);

impl Payload {
    /// Wrap an existing buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Some(bytes))
    }

    /// An empty, already-disposed payload.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Borrow the bytes, or `&[]` if this payload was already moved or
    /// disposed.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_deref().unwrap_or_default()
    }

    /// Byte length; `0` once moved or disposed.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True if there are no bytes left to read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the backing buffer, leaving an empty sentinel behind. A
    /// second call returns an empty `Vec`, never panics.
    pub fn move_payload(&mut self) -> Vec<u8> {
        self.0.take().unwrap_or_default()
    }

    /// Idempotently release the buffer back to `pool`, if any.
    pub fn dispose(&mut self, pool: &PayloadPool) {
        if let Some(bytes) = self.0.take() {
            pool.release(bytes);
        }
    }
}

/// The inter-node envelope: a [`RouteHeader`] plus its [`Payload`].
///
/// `RoutePacket` is intentionally not `Clone`: exactly-once ownership is
/// enforced by Rust's move semantics at the type level rather than by a
/// runtime flag — once a packet is passed by value to a sender or a
/// dispatch hook, the original binding simply no longer exists.
#[derive(Debug)]
pub struct RoutePacket {
    header: RouteHeader,
    payload: Payload,
    disposed: bool,
}

impl RoutePacket {
    /// A packet wrapping `header` and `payload`. `header.payload_size`
    /// is set to `payload.len()` if it was left at `0`, matching how a
    /// freshly-built outbound packet is usually constructed.
    pub fn new(mut header: RouteHeader, payload: Vec<u8>) -> Self {
        if header.payload_size == 0 {
            header.payload_size = payload.len() as u32;
        }
        Self {
            header,
            payload: Payload::new(payload),
            disposed: false,
        }
    }

    /// The route header.
    pub fn header(&self) -> &RouteHeader {
        &self.header
    }

    /// The payload bytes, or `&[]` if already moved/disposed.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Transfer the payload buffer out, leaving an empty sentinel.
    /// Subsequent `dispose()` is then a no-op for the buffer (there is
    /// nothing left to return to the pool).
    pub fn move_payload(&mut self) -> Vec<u8> {
        self.payload.move_payload()
    }

    /// Release the payload back to `pool`. Idempotent: calling this
    /// more than once, or after `move_payload`, does nothing further.
    pub fn dispose(&mut self, pool: &PayloadPool) {
        if self.disposed {
            return;
        }
        self.payload.dispose(pool);
        self.disposed = true;
    }

    /// True once [`Self::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Nid;

    fn packet() -> RoutePacket {
        let header = RouteHeader::new(Nid::new(1, "play-1"), "Echo");
        RoutePacket::new(header, b"hello".to_vec())
    }

    #[test]
    fn payload_size_is_derived_when_left_zero() {
        let p = packet();
        assert_eq!(p.header().payload_size, 5);
    }

    #[test]
    fn move_payload_leaves_empty_sentinel() {
        let mut p = packet();
        let bytes = p.move_payload();
        assert_eq!(bytes, b"hello");
        assert!(p.payload().is_empty());
        assert_eq!(p.move_payload(), Vec::<u8>::new());
    }

    #[test]
    fn dispose_is_idempotent() {
        let pool = PayloadPool::new();
        let mut p = packet();
        assert!(!p.is_disposed());
        p.dispose(&pool);
        assert!(p.is_disposed());
        p.dispose(&pool); // must not panic or double-release
        assert!(p.is_disposed());
    }

    #[test]
    fn pool_reuses_released_buffers() {
        let pool = PayloadPool::new();
        pool.release(Vec::with_capacity(64));
        let buf = pool.acquire();
        assert!(buf.capacity() >= 64);
    }
}
