// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The service registry (spec §4.3): an eventually consistent directory
//! of `{NID -> endpoint, state, weight}`, with round-robin and weighted
//! selection among `Running` members of a service.
//!
//! Grounded on `app/cluster/mod.rs`'s `Nodes`/`NodeInfo` map (the
//! teacher's directory of known ScyllaDB nodes, refreshed by its own
//! `Topology` events) and on `app/ring/mod.rs`'s pattern of keeping a
//! selection-ready snapshot next to the raw map so lookups never block
//! on the writer.

pub mod heartbeat;

use crate::{
    clock::Clock,
    identity::Nid,
};
use dashmap::DashMap;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};

/// Liveness state of a registry entry (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    /// Eligible for selection.
    Running,
    /// Heartbeat aged out; not selected, but not yet purged.
    Disabled,
}

/// The heartbeat/registry payload exchanged as a well-known system
/// message (spec §6 "Registry/heartbeat packet").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// The announcing node's identity.
    pub nid: Nid,
    /// Router bind endpoint other nodes should dial to reach it.
    pub endpoint: String,
    /// Free-form server type label (application-defined, e.g. `"lobby"`).
    pub server_type: String,
    /// The announcing node's numeric service id (redundant with
    /// `nid.service_id`, carried for forward-compatible decoding).
    pub service_id: u16,
    /// Self-reported liveness state at the time of the heartbeat.
    pub state: ServerState,
    /// Selection weight for [`ServiceRegistry::weighted`].
    pub weight: i32,
    /// Sender's wall-clock timestamp (Unix millis), informational only;
    /// liveness is judged by receipt time, not this value, since clocks
    /// across nodes are not assumed to be synchronized.
    pub timestamp_ms: i64,
}

struct Entry {
    info: ServerInfo,
    last_seen: Instant,
}

/// The per-node view of cluster membership, refreshed by heartbeats and
/// consulted for send-to-any-member selection.
pub struct ServiceRegistry {
    entries: DashMap<Nid, Entry>,
    round_robin_counters: DashMap<u16, AtomicUsize>,
    clock: Arc<dyn Clock>,
    liveness_timeout: Duration,
    purge_timeout: Duration,
}

impl ServiceRegistry {
    /// A registry using `clock` for age comparisons.
    pub fn new(clock: Arc<dyn Clock>, liveness_timeout: Duration, purge_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            round_robin_counters: DashMap::new(),
            clock,
            liveness_timeout,
            purge_timeout,
        }
    }

    /// Record (or refresh) a heartbeat. Always marks the entry
    /// `Running`, per spec §4.3 ("a periodic heartbeat announces
    /// ... state"): an explicitly `Disabled` self-announce is honored
    /// too (a draining node may announce itself disabled).
    pub fn upsert(&self, info: ServerInfo) {
        let now = self.clock.now();
        self.entries.insert(
            info.nid.clone(),
            Entry { info, last_seen: now },
        );
    }

    /// Look up a specific member's current info, regardless of state.
    pub fn get(&self, nid: &Nid) -> Option<ServerInfo> {
        self.entries.get(nid).map(|e| e.info.clone())
    }

    /// All known members, regardless of state.
    pub fn snapshot(&self) -> Vec<ServerInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    /// Apply liveness/purge aging (spec §4.3): entries whose last-seen
    /// age exceeds `liveness_timeout` move to `Disabled`; entries whose
    /// age exceeds `purge_timeout` are dropped entirely. Called
    /// periodically by [`heartbeat`]'s timer, never by application code.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut purge = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let age = now.saturating_duration_since(entry.last_seen);
            if age > self.purge_timeout {
                purge.push(entry.key().clone());
            } else if age > self.liveness_timeout {
                entry.info.state = ServerState::Disabled;
            }
        }
        for nid in purge {
            self.entries.remove(&nid);
        }
    }

    fn running_members(&self, service_id: u16) -> Vec<ServerInfo> {
        let mut members: Vec<ServerInfo> = self
            .entries
            .iter()
            .filter(|e| e.info.service_id == service_id && e.info.state == ServerState::Running)
            .map(|e| e.info.clone())
            .collect();
        members.sort_by(|a, b| a.nid.cmp(&b.nid));
        members
    }

    /// Pick the next member of `service_id` in round-robin order, with
    /// an independent counter per service. `None` if no member is
    /// `Running`.
    pub fn round_robin(&self, service_id: u16) -> Option<Nid> {
        let members = self.running_members(service_id);
        if members.is_empty() {
            return None;
        }
        let counter = self
            .round_robin_counters
            .entry(service_id)
            .or_insert_with(|| AtomicUsize::new(0));
        let idx = counter.fetch_add(1, Ordering::Relaxed) % members.len();
        Some(members[idx].nid.clone())
    }

    /// Pick the highest-weight `Running` member of `service_id`, ties
    /// broken deterministically by NID ordering. `None` if no member is
    /// `Running`.
    pub fn weighted(&self, service_id: u16) -> Option<Nid> {
        self.running_members(service_id)
            .into_iter()
            .max_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.nid.cmp(&b.nid)))
            .map(|info| info.nid)
    }

    /// Group running members by service id, for admin/debug surfaces.
    pub fn running_by_service(&self) -> HashMap<u16, Vec<Nid>> {
        let mut out: HashMap<u16, Vec<Nid>> = HashMap::new();
        for entry in self.entries.iter() {
            if entry.info.state == ServerState::Running {
                out.entry(entry.info.service_id).or_default().push(entry.info.nid.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn info(nid: Nid, weight: i32) -> ServerInfo {
        ServerInfo {
            nid,
            endpoint: "tcp://127.0.0.1:0".to_string(),
            server_type: "play".to_string(),
            service_id: 1,
            state: ServerState::Running,
            weight,
            timestamp_ms: 0,
        }
    }

    fn registry() -> (ServiceRegistry, TestClock) {
        let clock = TestClock::new();
        let registry = ServiceRegistry::new(Arc::new(clock.clone()), Duration::from_secs(5), Duration::from_secs(60));
        (registry, clock)
    }

    #[test]
    fn round_robin_cycles_through_running_members_in_nid_order() {
        let (registry, _clock) = registry();
        registry.upsert(info(Nid::new(1, "b"), 1));
        registry.upsert(info(Nid::new(1, "a"), 1));
        registry.upsert(info(Nid::new(1, "c"), 1));

        let picks: Vec<Nid> = (0..4).filter_map(|_| registry.round_robin(1)).collect();
        assert_eq!(
            picks,
            vec![
                Nid::new(1, "a"),
                Nid::new(1, "b"),
                Nid::new(1, "c"),
                Nid::new(1, "a"),
            ]
        );
    }

    #[test]
    fn round_robin_counters_are_independent_per_service() {
        let (registry, _clock) = registry();
        let mut svc2 = info(Nid::new(2, "x"), 1);
        svc2.service_id = 2;
        registry.upsert(info(Nid::new(1, "a"), 1));
        registry.upsert(svc2);

        assert_eq!(registry.round_robin(1), Some(Nid::new(1, "a")));
        assert_eq!(registry.round_robin(2), Some(Nid::new(2, "x")));
        // service 1's counter should not have been perturbed by service 2's call.
        assert_eq!(registry.round_robin(1), Some(Nid::new(1, "a")));
    }

    #[test]
    fn weighted_picks_highest_weight_with_deterministic_tie_break() {
        let (registry, _clock) = registry();
        registry.upsert(info(Nid::new(1, "low"), 1));
        registry.upsert(info(Nid::new(1, "high"), 10));
        assert_eq!(registry.weighted(1), Some(Nid::new(1, "high")));

        let (registry, _clock) = registry();
        registry.upsert(info(Nid::new(1, "z"), 5));
        registry.upsert(info(Nid::new(1, "a"), 5));
        // tie on weight: lexicographically-first NID wins.
        assert_eq!(registry.weighted(1), Some(Nid::new(1, "a")));
    }

    #[test]
    fn selection_returns_none_when_nobody_is_running() {
        let (registry, _clock) = registry();
        assert_eq!(registry.round_robin(1), None);
        assert_eq!(registry.weighted(1), None);
    }

    #[test]
    fn monotonicity_running_member_stays_running_until_liveness_timeout() {
        let (registry, clock) = registry();
        registry.upsert(info(Nid::new(1, "a"), 1));

        clock.advance(Duration::from_secs(4));
        registry.sweep();
        assert_eq!(registry.get(&Nid::new(1, "a")).unwrap().state, ServerState::Running);

        clock.advance(Duration::from_secs(2)); // total age 6s > liveness 5s
        registry.sweep();
        assert_eq!(registry.get(&Nid::new(1, "a")).unwrap().state, ServerState::Disabled);
        assert_eq!(registry.round_robin(1), None);
    }

    #[test]
    fn purge_removes_entries_past_purge_timeout() {
        let (registry, clock) = registry();
        registry.upsert(info(Nid::new(1, "a"), 1));
        clock.advance(Duration::from_secs(61));
        registry.sweep();
        assert!(registry.get(&Nid::new(1, "a")).is_none());
    }
}
