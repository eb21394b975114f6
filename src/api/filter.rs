// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The API dispatcher's filter/aspect chain (spec §4.9 step 2-3):
//! controller- and node-level filters composed innermost-first around
//! the matched handler.
//!
//! Grounded on spec §9's redesign flag ("explicit registration table
//! ... preserves duplicate detection and filter-chain composition")
//! rather than any one teacher file; the recursive boxed-future
//! continuation shape follows the same `Arc<dyn Trait + Send + Sync>`
//! composition style `app/worker/mod.rs`'s boxed callbacks use.

use crate::{
    error::PlayHouseError,
    route::packet::RoutePacket,
    sender::DispatchContext,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// One handler invocation, already bound to its `msgId`'s registered
/// function. Boxed so the dispatcher can hold handlers of unrelated
/// concrete closures in one map.
pub type HandlerFn = Arc<dyn Fn(DispatchContext, RoutePacket) -> BoxFuture<'static, Result<(), PlayHouseError>> + Send + Sync>;

/// One link in the filter chain. `invoke` decides whether/how to call
/// `next` — it may run code before and after, short-circuit by not
/// calling `next` at all, or rewrite `packet` before passing it on.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn invoke(&self, ctx: DispatchContext, packet: RoutePacket, next: Next<'_>) -> Result<(), PlayHouseError>;
}

/// The remaining filters plus the handler they eventually call.
/// Borrowed rather than owned so building a chain for a dispatch
/// doesn't need to clone every filter `Arc` on every call.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    handler: &'a HandlerFn,
}

impl<'a> Next<'a> {
    fn new(filters: &'a [Arc<dyn Filter>], handler: &'a HandlerFn) -> Self {
        Self { filters, handler }
    }

    /// Advance the chain: call the next filter, or the handler itself
    /// once the chain is exhausted.
    pub fn invoke(self, ctx: DispatchContext, packet: RoutePacket) -> BoxFuture<'a, Result<(), PlayHouseError>> {
        match self.filters.split_first() {
            Some((first, rest)) => {
                let next = Next::new(rest, self.handler);
                Box::pin(async move { first.invoke(ctx, packet, next).await })
            }
            None => (self.handler)(ctx, packet),
        }
    }
}

/// Run `ctx`/`packet` through `filters` (innermost first, per spec
/// §4.9) and finally `handler`.
pub fn invoke_chain<'a>(filters: &'a [Arc<dyn Filter>], handler: &'a HandlerFn, ctx: DispatchContext, packet: RoutePacket) -> BoxFuture<'a, Result<(), PlayHouseError>> {
    Next::new(filters, handler).invoke(ctx, packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::TestClock,
        correlator::Correlator,
        identity::Nid,
        registry::ServiceRegistry,
        route::header::RouteHeader,
        sender::Sender,
        transport::Transport,
    };
    use std::{
        sync::{
            atomic::{
                AtomicU32,
                Ordering,
            },
            Mutex,
        },
        time::Duration,
    };

    struct NullTransport;
    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _nid: &Nid, _header: RouteHeader, _payload: Vec<u8>) -> Result<(), PlayHouseError> {
            Ok(())
        }
        async fn shutdown(&self) {}
    }

    fn ctx() -> DispatchContext {
        let sender = Arc::new(Sender::new(
            Nid::new(1, "api-1"),
            Arc::new(NullTransport),
            Arc::new(ServiceRegistry::new(Arc::new(TestClock::new()), Duration::from_secs(5), Duration::from_secs(60))),
            Arc::new(Correlator::new()),
            Arc::new(TestClock::new()),
            Duration::from_secs(1),
        ));
        DispatchContext::new(RouteHeader::new(Nid::new(2, "client-origin"), "Ping"), sender)
    }

    struct RecordingFilter {
        order: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    }

    #[async_trait]
    impl Filter for RecordingFilter {
        async fn invoke(&self, ctx: DispatchContext, packet: RoutePacket, next: Next<'_>) -> Result<(), PlayHouseError> {
            self.order.lock().unwrap().push(self.name);
            next.invoke(ctx, packet).await
        }
    }

    struct ShortCircuitFilter;
    #[async_trait]
    impl Filter for ShortCircuitFilter {
        async fn invoke(&self, _ctx: DispatchContext, _packet: RoutePacket, _next: Next<'_>) -> Result<(), PlayHouseError> {
            Err(PlayHouseError::Unauthenticated)
        }
    }

    #[tokio::test]
    async fn chain_runs_filters_outer_to_inner_then_the_handler() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(RecordingFilter { order: order.clone(), name: "outer" }),
            Arc::new(RecordingFilter { order: order.clone(), name: "inner" }),
        ];
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let handler: HandlerFn = Arc::new(move |_ctx, _packet| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });

        let packet = RoutePacket::new(RouteHeader::new(Nid::new(2, "client-origin"), "Ping"), Vec::new());
        invoke_chain(&filters, &handler, ctx(), packet).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_filter_can_short_circuit_before_the_handler() {
        let filters: Vec<Arc<dyn Filter>> = vec![Arc::new(ShortCircuitFilter)];
        let handler: HandlerFn = Arc::new(|_ctx, _packet| Box::pin(async { panic!("handler must not run") }));

        let packet = RoutePacket::new(RouteHeader::new(Nid::new(2, "client-origin"), "Ping"), Vec::new());
        let err = invoke_chain(&filters, &handler, ctx(), packet).await.unwrap_err();
        assert!(matches!(err, PlayHouseError::Unauthenticated));
    }
}
