// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node configuration (spec §6, "Environment / configuration"). The
//! crate does not read configuration files itself (file parsing is an
//! explicit non-goal, spec §1); embedders build a [`PlayHouseConfig`]
//! however they like (env vars, a TOML file, a CLI flag struct) and hand
//! it to [`crate::node::Node`].

use crate::identity::ServiceKind;
use serde::{
    Deserialize,
    Serialize,
};

/// All recognized node configuration options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayHouseConfig {
    /// URL of the router bind, e.g. `tcp://0.0.0.0:7890`. Required.
    pub bind_endpoint: String,
    /// This node's textual server id, the second half of its [`Nid`](crate::identity::Nid).
    pub server_id: String,
    /// The role this node plays in the mesh.
    pub service_kind: ServiceKind,
    /// The numeric service id, the first half of this node's [`Nid`](crate::identity::Nid).
    pub service_id: u16,
    /// Default deadline for `RequestTo*` calls that don't specify one.
    pub request_timeout_ms: u64,
    /// Interval between self-announce heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Age after which a registry entry with no heartbeat is `Disabled`.
    pub liveness_timeout_ms: u64,
    /// Age after which a `Disabled` registry entry is purged entirely.
    pub purge_timeout_ms: u64,
    /// Router socket send high-water mark.
    pub send_hwm: i32,
    /// Router socket receive high-water mark.
    pub receive_hwm: i32,
    /// Router socket linger period on close.
    pub linger_ms: i32,
    /// TCP keepalive idle time, if enabled.
    pub tcp_keepalive_secs: Option<u32>,
    /// The only `msgId` an unauthenticated actor may send.
    pub authenticate_message_id: String,
    /// Stage type `CreateStage`/`GetOrCreateStage` requests fall back to
    /// when the sender leaves `stage_type` empty.
    pub default_stage_type: String,
    /// Maximum accepted client payload size in bytes.
    pub max_body_size: u32,
    /// Payloads exceeding this size are LZ4-compressed.
    pub compression_threshold: u32,
}

impl Default for PlayHouseConfig {
    fn default() -> Self {
        Self {
            bind_endpoint: "tcp://127.0.0.1:7890".to_string(),
            server_id: "node-1".to_string(),
            service_kind: ServiceKind::Play,
            service_id: 1,
            request_timeout_ms: 30_000,
            heartbeat_interval_ms: 1_000,
            liveness_timeout_ms: 5_000,
            purge_timeout_ms: 60_000,
            send_hwm: 1_000,
            receive_hwm: 1_000,
            linger_ms: 0,
            tcp_keepalive_secs: None,
            authenticate_message_id: "Authenticate".to_string(),
            default_stage_type: "Default".to_string(),
            max_body_size: 2 * 1024 * 1024,
            compression_threshold: 512,
        }
    }
}

impl PlayHouseConfig {
    /// A config with every field defaulted except the bind endpoint.
    pub fn new<T: Into<String>>(bind_endpoint: T) -> Self {
        Self {
            bind_endpoint: bind_endpoint.into(),
            ..Self::default()
        }
    }

    /// Set [`Self::server_id`].
    pub fn server_id<T: Into<String>>(mut self, server_id: T) -> Self {
        self.server_id = server_id.into();
        self
    }

    /// Set [`Self::service_kind`].
    pub fn service_kind(mut self, kind: ServiceKind) -> Self {
        self.service_kind = kind;
        self
    }

    /// Set [`Self::service_id`].
    pub fn service_id(mut self, id: u16) -> Self {
        self.service_id = id;
        self
    }

    /// Set [`Self::request_timeout_ms`].
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Set [`Self::heartbeat_interval_ms`].
    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Set [`Self::liveness_timeout_ms`].
    pub fn liveness_timeout_ms(mut self, ms: u64) -> Self {
        self.liveness_timeout_ms = ms;
        self
    }

    /// Set [`Self::purge_timeout_ms`].
    pub fn purge_timeout_ms(mut self, ms: u64) -> Self {
        self.purge_timeout_ms = ms;
        self
    }

    /// Set [`Self::authenticate_message_id`].
    pub fn authenticate_message_id<T: Into<String>>(mut self, msg_id: T) -> Self {
        self.authenticate_message_id = msg_id.into();
        self
    }

    /// Set [`Self::default_stage_type`].
    pub fn default_stage_type<T: Into<String>>(mut self, stage_type: T) -> Self {
        self.default_stage_type = stage_type.into();
        self
    }

    /// Set [`Self::max_body_size`].
    pub fn max_body_size(mut self, bytes: u32) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Set [`Self::compression_threshold`].
    pub fn compression_threshold(mut self, bytes: u32) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// This node's [`Nid`](crate::identity::Nid), derived from
    /// `service_id` and `server_id`.
    pub fn nid(&self) -> crate::identity::Nid {
        crate::identity::Nid::new(self.service_id, self.server_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recommendations() {
        let cfg = PlayHouseConfig::default();
        assert_eq!(cfg.request_timeout_ms, 30_000);
        assert_eq!(cfg.heartbeat_interval_ms, 1_000);
        assert_eq!(cfg.liveness_timeout_ms, 5_000);
        assert_eq!(cfg.purge_timeout_ms, 60_000);
        assert_eq!(cfg.max_body_size, 2 * 1024 * 1024);
        assert_eq!(cfg.compression_threshold, 512);
    }

    #[test]
    fn builder_overrides_only_touched_fields() {
        let cfg = PlayHouseConfig::new("tcp://0.0.0.0:9000")
            .server_id("play-1")
            .service_id(2)
            .request_timeout_ms(5_000);
        assert_eq!(cfg.bind_endpoint, "tcp://0.0.0.0:9000");
        assert_eq!(cfg.server_id, "play-1");
        assert_eq!(cfg.service_id, 2);
        assert_eq!(cfg.request_timeout_ms, 5_000);
        assert_eq!(cfg.heartbeat_interval_ms, 1_000);
    }

    #[test]
    fn default_stage_type_defaults_to_default_and_is_overridable() {
        let cfg = PlayHouseConfig::new("tcp://0.0.0.0:9000");
        assert_eq!(cfg.default_stage_type, "Default");
        let cfg = cfg.default_stage_type("Lobby");
        assert_eq!(cfg.default_stage_type, "Lobby");
    }
}
