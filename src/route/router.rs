// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The per-node routing decision table (spec §4.4). This module is the
//! pure "which rule matches" half of routing; [`crate::node::Node`]
//! owns the side-effecting half (enqueue into a mailbox, forward over
//! the transport, reply with `NotRouted`) since that requires live
//! handles to the stage host, registry, and correlator.

use crate::route::header::RouteHeader;

/// Where an inbound [`crate::route::packet::RoutePacket`] should go,
/// decided by applying spec §4.4's rules in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// `isReply == true`: deliver to the request correlator.
    Correlator,
    /// `isSystem == true`: deliver to the node's system handler.
    SystemHandler,
    /// `isToClient == true` and this node is a Session node: forward to
    /// the named client SID.
    ToClient(i64),
    /// `stageId != 0` and this node hosts that stage: enqueue in its
    /// mailbox.
    LocalStage(i64),
    /// `stageId != 0` but the stage is not local: the caller must look
    /// up the hosting node via the registry and forward.
    RemoteStage(i64),
    /// None of the above: dispatch via the API handler registry.
    ApiDispatch,
}

/// What the router needs to know about the local node to apply the
/// rules that depend on local state (hosting a stage, being a Session
/// node).
pub trait LocalRouting {
    /// True if this node terminates client connections (spec §2).
    fn is_session_node(&self) -> bool;
    /// True if `stage_id` is currently hosted on this node.
    fn hosts_stage(&self, stage_id: i64) -> bool;
}

/// Apply spec §4.4's rule table, in order, to decide where `header`'s
/// packet goes.
pub fn resolve<L: LocalRouting>(header: &RouteHeader, local: &L) -> RouteTarget {
    if header.is_reply {
        return RouteTarget::Correlator;
    }
    if header.is_system {
        return RouteTarget::SystemHandler;
    }
    if header.is_to_client && local.is_session_node() {
        return RouteTarget::ToClient(header.sid);
    }
    if header.stage_id != 0 {
        return if local.hosts_stage(header.stage_id) {
            RouteTarget::LocalStage(header.stage_id)
        } else {
            RouteTarget::RemoteStage(header.stage_id)
        };
    }
    RouteTarget::ApiDispatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Nid;

    struct Fixture {
        is_session: bool,
        local_stages: Vec<i64>,
    }

    impl LocalRouting for Fixture {
        fn is_session_node(&self) -> bool {
            self.is_session
        }
        fn hosts_stage(&self, stage_id: i64) -> bool {
            self.local_stages.contains(&stage_id)
        }
    }

    fn header() -> RouteHeader {
        RouteHeader::new(Nid::new(1, "play-1"), "Echo")
    }

    #[test]
    fn reply_always_goes_to_correlator_first() {
        let mut h = header();
        h.is_reply = true;
        h.is_system = true; // would otherwise match system handler
        let local = Fixture { is_session: false, local_stages: vec![] };
        assert_eq!(resolve(&h, &local), RouteTarget::Correlator);
    }

    #[test]
    fn system_before_stage_or_client_checks() {
        let mut h = header();
        h.is_system = true;
        h.stage_id = 5;
        let local = Fixture { is_session: true, local_stages: vec![5] };
        assert_eq!(resolve(&h, &local), RouteTarget::SystemHandler);
    }

    #[test]
    fn to_client_requires_being_a_session_node() {
        let mut h = header();
        h.is_to_client = true;
        h.sid = 77;
        let session = Fixture { is_session: true, local_stages: vec![] };
        assert_eq!(resolve(&h, &session), RouteTarget::ToClient(77));

        let play = Fixture { is_session: false, local_stages: vec![] };
        // falls through to ApiDispatch since stage_id is 0 here.
        assert_eq!(resolve(&h, &play), RouteTarget::ApiDispatch);
    }

    #[test]
    fn local_vs_remote_stage() {
        let mut h = header();
        h.stage_id = 42;
        let local = Fixture { is_session: false, local_stages: vec![42] };
        assert_eq!(resolve(&h, &local), RouteTarget::LocalStage(42));

        let remote = Fixture { is_session: false, local_stages: vec![] };
        assert_eq!(resolve(&h, &remote), RouteTarget::RemoteStage(42));
    }

    #[test]
    fn falls_through_to_api_dispatch() {
        let h = header();
        let local = Fixture { is_session: false, local_stages: vec![] };
        assert_eq!(resolve(&h, &local), RouteTarget::ApiDispatch);
    }
}
