// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Session node's client-wire-protocol bridge (spec §2, §9): maps
//! `sid -> accountId -> stage` and translates between client frames and
//! `RoutePacket`s.

pub mod bridge;

pub use bridge::{
    ClientLink,
    SessionBinding,
    SessionBridge,
};
