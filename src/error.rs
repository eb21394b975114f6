// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! Framework error kinds (spec §7) and the wire `errorCode` numbering
//! convention: the framework reserves `60000..=60999`; everything else
//! belongs to the application.

use thiserror::Error;

/// Inclusive range of `errorCode` values the framework itself may emit.
pub const FRAMEWORK_ERROR_RANGE: std::ops::RangeInclusive<u16> = 60000..=60999;

/// A wire-visible error code. `0` always means success.
pub type ErrorCode = u16;

/// `errorCode` assigned to each framework error kind (spec §7).
pub mod codes {
    use super::ErrorCode;

    pub const SUCCESS: ErrorCode = 0;
    pub const PEER_UNREACHABLE: ErrorCode = 60001;
    pub const BACKPRESSURE: ErrorCode = 60002;
    pub const REQUEST_TIMEOUT: ErrorCode = 60003;
    pub const NOT_ROUTED: ErrorCode = 60004;
    pub const UNAUTHENTICATED: ErrorCode = 60005;
    pub const DUPLICATE_HANDLER: ErrorCode = 60006;
    pub const STAGE_CLOSED: ErrorCode = 60007;
    pub const INTERNAL_ERROR: ErrorCode = 60008;
    pub const SHUTTING_DOWN: ErrorCode = 60009;
    pub const MSG_ID_OVERFLOW: ErrorCode = 60010;
    pub const BODY_OVERFLOW: ErrorCode = 60011;
    pub const TRUNCATED: ErrorCode = 60012;
}

/// Errors originating from the framework itself, as opposed to
/// application-level reply error codes (which are plain `ErrorCode`
/// values outside [`FRAMEWORK_ERROR_RANGE`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlayHouseError {
    /// A router send failed because the target NID is not currently
    /// reachable. The originating request fails with this code; the
    /// core never retries on its own.
    #[error("peer unreachable")]
    PeerUnreachable,
    /// The router send queue hit its high-water mark.
    #[error("send would exceed high-water mark")]
    Backpressure,
    /// A request's deadline elapsed before a reply arrived.
    #[error("request timed out")]
    RequestTimeout,
    /// No routing rule matched an inbound packet.
    #[error("packet matched no routing rule")]
    NotRouted,
    /// A pre-authentication packet used a `msgId` other than the
    /// configured authenticate message.
    #[error("actor is not authenticated")]
    Unauthenticated,
    /// Two handlers were registered for the same `msgId`.
    #[error("duplicate handler for msgId {0:?}")]
    DuplicateHandler(String),
    /// A packet was enqueued after the stage began closing.
    #[error("stage is closed")]
    StageClosed,
    /// A dispatch, timer, or post callback panicked or returned an
    /// unhandled error.
    #[error("internal error: {0}")]
    InternalError(String),
    /// The node is shutting down and no longer accepts new work.
    #[error("node is shutting down")]
    ShuttingDown,
    /// `msgId` exceeded the 256-byte wire limit.
    #[error("msgId exceeds 256 bytes")]
    MsgIdOverflow,
    /// Payload exceeded `MaxBodySize`.
    #[error("body exceeds configured max size")]
    BodyOverflow,
    /// A frame was incomplete; the caller should buffer more bytes.
    #[error("frame truncated, buffer more input")]
    Truncated,
}

impl PlayHouseError {
    /// The wire `errorCode` this error maps to.
    pub fn code(&self) -> ErrorCode {
        use codes::*;
        match self {
            Self::PeerUnreachable => PEER_UNREACHABLE,
            Self::Backpressure => BACKPRESSURE,
            Self::RequestTimeout => REQUEST_TIMEOUT,
            Self::NotRouted => NOT_ROUTED,
            Self::Unauthenticated => UNAUTHENTICATED,
            Self::DuplicateHandler(_) => DUPLICATE_HANDLER,
            Self::StageClosed => STAGE_CLOSED,
            Self::InternalError(_) => INTERNAL_ERROR,
            Self::ShuttingDown => SHUTTING_DOWN,
            Self::MsgIdOverflow => MSG_ID_OVERFLOW,
            Self::BodyOverflow => BODY_OVERFLOW,
            Self::Truncated => TRUNCATED,
        }
    }

    /// True if `code` falls in the framework's reserved range.
    pub fn is_framework_code(code: ErrorCode) -> bool {
        FRAMEWORK_ERROR_RANGE.contains(&code)
    }
}
