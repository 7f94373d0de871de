//! Liveness key codec.
//!
//! A live session's identity is stored in the hint store as
//! `<namespace>:<room_id>___<record_id>___<stream_id>`, where the namespace
//! selects the owning backend. This module is the only place that builds or
//! parses that string.

use std::fmt;
use thiserror::Error;

use crate::models::BackendKind;

pub const DELIMITER: &str = "___";

/// Key prefixes that share the expiration feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Cdn,
    Relay,
    /// Order expiry keys; handled elsewhere and ignored here.
    OrderExpire,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Cdn, Namespace::Relay, Namespace::OrderExpire];

    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Cdn => "live:cdn:",
            Namespace::Relay => "live:relay:",
            Namespace::OrderExpire => "order:expire:",
        }
    }

    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Cdn => Namespace::Cdn,
            BackendKind::Relay => Namespace::Relay,
        }
    }

    /// Backend owning keys in this namespace, if any.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Namespace::Cdn => Some(BackendKind::Cdn),
            Namespace::Relay => Some(BackendKind::Relay),
            Namespace::OrderExpire => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key {raw:?} is not in namespace {prefix:?}")]
    WrongNamespace { prefix: &'static str, raw: String },

    #[error("key {raw:?} has {found} components, expected 3")]
    ComponentCount { raw: String, found: usize },

    #[error("key {raw:?} has invalid component {component:?}")]
    InvalidComponent { raw: String, component: String },
}

/// Identity of a live session as encoded in a liveness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LivenessKey {
    pub backend: BackendKind,
    pub room_id: i64,
    pub record_id: i64,
    pub stream_id: i64,
}

impl LivenessKey {
    pub fn new(backend: BackendKind, room_id: i64, record_id: i64, stream_id: i64) -> Self {
        Self {
            backend,
            room_id,
            record_id,
            stream_id,
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::for_backend(self.backend)
    }

    pub fn encode(&self) -> String {
        encode(self.backend, self.room_id, self.record_id, self.stream_id)
    }
}

impl fmt::Display for LivenessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

pub fn encode(backend: BackendKind, room_id: i64, record_id: i64, stream_id: i64) -> String {
    format!(
        "{}{}{}{}{}{}",
        Namespace::for_backend(backend).prefix(),
        room_id,
        DELIMITER,
        record_id,
        DELIMITER,
        stream_id
    )
}

/// Namespace of an arbitrary key from the expiration feed.
pub fn classify(raw: &str) -> Option<Namespace> {
    Namespace::ALL
        .into_iter()
        .find(|ns| raw.starts_with(ns.prefix()))
}

/// Parse `raw` as a liveness key of `namespace`.
///
/// Never yields a partial identity: every component must be a positive
/// integer and there must be exactly three of them.
pub fn decode(namespace: Namespace, raw: &str) -> Result<LivenessKey, KeyError> {
    let (Some(backend), Some(body)) = (namespace.backend(), raw.strip_prefix(namespace.prefix()))
    else {
        return Err(KeyError::WrongNamespace {
            prefix: namespace.prefix(),
            raw: raw.to_string(),
        });
    };

    let parts: Vec<&str> = body.split(DELIMITER).collect();
    if parts.len() != 3 {
        return Err(KeyError::ComponentCount {
            raw: raw.to_string(),
            found: parts.len(),
        });
    }

    let mut ids = [0i64; 3];
    for (slot, part) in ids.iter_mut().zip(&parts) {
        *slot = match parse_component(part) {
            Some(id) => id,
            None => {
                return Err(KeyError::InvalidComponent {
                    raw: raw.to_string(),
                    component: part.to_string(),
                })
            }
        };
    }

    Ok(LivenessKey::new(backend, ids[0], ids[1], ids[2]))
}

/// Positive id in canonical form only, so a decoded key re-encodes to the
/// exact string it came from. No sign, no leading zeros, no whitespace.
fn parse_component(part: &str) -> Option<i64> {
    if part.is_empty() || part.starts_with('0') || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse::<i64>().ok()
}
