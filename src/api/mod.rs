// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The stateless API dispatcher (spec §4.9): a fixed, startup-built
//! handler table plus a filter/aspect chain, for nodes that receive
//! `isBackend` packets rather than host stages.

pub mod dispatcher;
pub mod filter;

pub use dispatcher::{
    ApiController,
    ApiDispatcher,
    ApiDispatcherBuilder,
    ApiSender,
    HandlerRegister,
};
pub use filter::{
    invoke_chain,
    Filter,
    HandlerFn,
    Next,
};
