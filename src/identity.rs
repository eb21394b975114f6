// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node identity (spec §3 "Identities"): `NID = (serviceId, serverId)`
//! in its canonical `serviceId:serverId` textual form, and the three
//! service roles a node may run.

use serde::{
    de::Error as DeError,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use std::{
    fmt,
    str::FromStr,
};
use thiserror::Error;

/// The role a node plays in the mesh (spec §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// Edge-facing: terminates client connections.
    Session,
    /// Hosts stages and actors.
    Play,
    /// Stateless request handlers.
    Api,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Play => write!(f, "play"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// A node identity, canonically written `serviceId:serverId`.
///
/// Orders first by `service_id`, then by `server_id`, so
/// [`crate::registry::ServiceRegistry::weighted`]'s tie-break ("ties
/// broken deterministically by NID ordering", spec §4.3) is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nid {
    /// The numeric service id.
    pub service_id: u16,
    /// The textual server id, unique among peers sharing `service_id`.
    pub server_id: String,
}

/// Error parsing a NID from its textual form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NidParseError {
    /// The text had no `:` separator.
    #[error("NID {0:?} is missing the ':' separator")]
    MissingSeparator(String),
    /// The part before `:` was not a valid `u16`.
    #[error("NID {0:?} has a non-numeric serviceId")]
    InvalidServiceId(String),
}

impl Nid {
    /// Construct a NID directly.
    pub fn new<T: Into<String>>(service_id: u16, server_id: T) -> Self {
        Self {
            service_id,
            server_id: server_id.into(),
        }
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_id, self.server_id)
    }
}

impl FromStr for Nid {
    type Err = NidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service_id, server_id) = s
            .split_once(':')
            .ok_or_else(|| NidParseError::MissingSeparator(s.to_string()))?;
        let service_id = service_id
            .parse::<u16>()
            .map_err(|_| NidParseError::InvalidServiceId(s.to_string()))?;
        Ok(Self::new(service_id, server_id.to_string()))
    }
}

impl Serialize for Nid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Nid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Nid::from_str(&s).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let nid = Nid::new(3, "play-7");
        let text = nid.to_string();
        assert_eq!(text, "3:play-7");
        assert_eq!(text.parse::<Nid>().unwrap(), nid);
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            "no-colon-here".parse::<Nid>(),
            Err(NidParseError::MissingSeparator(_))
        ));
    }

    #[test]
    fn orders_by_service_id_then_server_id() {
        let mut nids = vec![
            Nid::new(2, "b"),
            Nid::new(1, "z"),
            Nid::new(1, "a"),
        ];
        nids.sort();
        assert_eq!(
            nids,
            vec![Nid::new(1, "a"), Nid::new(1, "z"), Nid::new(2, "b")]
        );
    }

    #[test]
    fn serde_uses_canonical_text_form() {
        let nid = Nid::new(5, "api-1");
        let json = serde_json::to_string(&nid).unwrap();
        assert_eq!(json, "\"5:api-1\"");
        let back: Nid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, nid);
    }
}
