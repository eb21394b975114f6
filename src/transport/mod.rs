// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The transport collaborator contract (spec §6) and its ZeroMQ ROUTER
//! realization in [`router_socket`].

pub mod router_socket;

use crate::{
    error::PlayHouseError,
    identity::Nid,
    route::header::RouteHeader,
};
use async_trait::async_trait;

/// What the rest of the node needs from the wire: hand a packet to a
/// peer NID, or shut down. `Connect`/`Disconnect` from spec §6 are not
/// separate trait methods here: a ROUTER socket dials peers lazily the
/// first time it addresses them, so connection management is an
/// internal detail of whichever `Transport` implementation is in use,
/// not something a sender needs to drive. `Receive` is likewise
/// internal — an implementation feeds inbound packets to the node over
/// its own channel rather than through this trait, since receiving
/// happens on a dedicated loop (spec §5), not on demand from a caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `header`/`payload` to `nid`. Fails with
    /// [`PlayHouseError::PeerUnreachable`] if the peer cannot be
    /// reached, or [`PlayHouseError::Backpressure`] if the send queue
    /// is at its high-water mark.
    async fn send(&self, nid: &Nid, header: RouteHeader, payload: Vec<u8>) -> Result<(), PlayHouseError>;

    /// Stop accepting new sends and release the underlying socket.
    async fn shutdown(&self);
}
