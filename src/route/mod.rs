// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The inter-node envelope (spec §3, §4.4): [`RouteHeader`], the pooled
//! [`Payload`]-carrying [`RoutePacket`], and the pure routing-decision
//! table in [`router`].

pub mod header;
pub mod packet;
pub mod router;

pub use header::RouteHeader;
pub use packet::{
    Payload,
    PayloadPool,
    RoutePacket,
};
pub use router::{
    resolve,
    LocalRouting,
    RouteTarget,
};
