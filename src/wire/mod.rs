// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The client↔server wire protocol (spec §4.1): framing and LZ4
//! compression. Stable and restartable across TCP chunk boundaries.

pub mod client_frame;
pub mod compression;

pub use client_frame::{
    decode_client_frame,
    decode_server_frame,
    encode_client_frame,
    encode_server_frame,
    ClientFrame,
    ServerFrame,
};
