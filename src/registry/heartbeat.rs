// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! The heartbeat loop (spec §4.3): periodic self-announce, and the
//! liveness/purge sweep, both driven off the node's own [`Clock`] so
//! tests can drive them without a wall-clock sleep.
//!
//! Grounded on `app/cluster/mod.rs`'s periodic gossip/ping task that
//! keeps `Nodes` fresh, rebuilt here around PlayHouse's simpler
//! self-announce-to-known-peers model instead of full gossip.

use crate::{
    clock::Clock,
    identity::Nid,
    registry::{
        ServerInfo,
        ServerState,
        ServiceRegistry,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;

/// Where the heartbeat loop sends this node's own announcement. Kept
/// separate from the transport so the loop is testable without a real
/// router socket.
#[async_trait::async_trait]
pub trait HeartbeatTransport: Send + Sync {
    /// Broadcast `info` to every peer this node currently knows about.
    async fn broadcast(&self, info: &ServerInfo);
}

/// Parameters for [`run`].
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often this node announces itself.
    pub interval: Duration,
    /// How long since a peer's last heartbeat before it's marked
    /// `Disabled`.
    pub liveness_timeout: Duration,
    /// How long a `Disabled` peer lingers before being purged entirely.
    pub purge_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            liveness_timeout: Duration::from_secs(10),
            purge_timeout: Duration::from_secs(60),
        }
    }
}

/// Build this node's own [`ServerInfo`] announcement.
pub fn self_announcement(
    nid: Nid,
    endpoint: String,
    server_type: String,
    weight: i32,
    now_unix_ms: i64,
) -> ServerInfo {
    ServerInfo {
        service_id: nid.service_id,
        nid,
        endpoint,
        server_type,
        state: ServerState::Running,
        weight,
        timestamp_ms: now_unix_ms,
    }
}

/// Apply an inbound heartbeat/registry packet to `registry` (spec §4.4's
/// `isSystem` `SystemHandler` route lands heartbeat packets here).
pub fn apply_received(registry: &ServiceRegistry, info: ServerInfo) {
    registry.upsert(info);
}

/// Drives periodic self-announce and liveness/purge sweeping until
/// `shutdown` fires. Spawned once per node onto the compute runtime
/// (spec §5); owns no networking itself beyond `transport`.
pub async fn run(
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn HeartbeatTransport>,
    clock: Arc<dyn Clock>,
    config: HeartbeatConfig,
    announce: impl Fn() -> ServerInfo + Send + Sync + 'static,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = clock.now();
                let info = announce();
                transport.broadcast(&info).await;
                registry.sweep();
            }
            _ = shutdown.recv() => {
                log::info!("heartbeat loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };
    use tokio::sync::Mutex;

    struct RecordingTransport {
        calls: Arc<AtomicUsize>,
        last: Mutex<Option<ServerInfo>>,
    }

    #[async_trait::async_trait]
    impl HeartbeatTransport for RecordingTransport {
        async fn broadcast(&self, info: &ServerInfo) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().await = Some(info.clone());
        }
    }

    #[test]
    fn self_announcement_carries_the_nid_service_id() {
        let nid = Nid::new(7, "play-1");
        let info = self_announcement(nid.clone(), "tcp://a:1".to_string(), "play".to_string(), 10, 0);
        assert_eq!(info.service_id, 7);
        assert_eq!(info.nid, nid);
        assert_eq!(info.state, ServerState::Running);
    }

    #[test]
    fn apply_received_upserts_into_registry() {
        let clock = Arc::new(TestClock::new());
        let registry = ServiceRegistry::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        let info = self_announcement(Nid::new(1, "a"), "tcp://a:1".to_string(), "play".to_string(), 1, 0);
        apply_received(&registry, info.clone());
        assert_eq!(registry.get(&Nid::new(1, "a")), Some(info));
    }

    #[tokio::test(start_paused = true)]
    async fn run_broadcasts_on_every_tick_until_shutdown() {
        let clock = Arc::new(TestClock::new());
        let registry = Arc::new(ServiceRegistry::new(clock.clone(), Duration::from_secs(5), Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(RecordingTransport { calls: calls.clone(), last: Mutex::new(None) });
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let config = HeartbeatConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let nid = Nid::new(1, "a");
        let handle = tokio::spawn(run(
            registry,
            transport,
            clock,
            config,
            move || self_announcement(nid.clone(), "tcp://a:1".to_string(), "play".to_string(), 1, 0),
            shutdown_rx,
        ));

        tokio::time::advance(Duration::from_millis(35)).await;
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
