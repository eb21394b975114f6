// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The stage executor and actor lifecycle (spec §4.6, §4.7): a single
//! mailbox per stage, actor authentication/join/dispatch/destroy,
//! timers, and async blocks — all funneled through one mailbox so
//! application code sees strict single-threaded semantics per stage
//! (spec §5).

pub mod actor;
pub mod async_block;
pub mod executor;
pub mod timer;

pub use actor::{
    Actor,
    ActorHandler,
    ActorState,
};
pub use executor::{
    MailboxEntry,
    StageExecutor,
    StageHandle,
    StageHandler,
    StageLink,
    StageState,
    StageTimers,
    TimerCallback,
};
pub use timer::TimerId;
