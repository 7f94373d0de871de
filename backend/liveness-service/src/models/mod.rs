use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upstream streaming backend a session is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CDN-push ingest (backend A)
    Cdn,
    /// Self-hosted relay (backend B)
    Relay,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Cdn, BackendKind::Relay];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Cdn => "cdn",
            BackendKind::Relay => "relay",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cdn" => Ok(BackendKind::Cdn),
            "relay" => Ok(BackendKind::Relay),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Live pointer row owned by the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSession {
    pub id: i64,
    pub room_id: i64,
    pub record_id: i64,
    pub stream_id: i64,
    pub backend: BackendKind,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw row as stored; `backend` is kept as text in the table.
#[derive(Debug, sqlx::FromRow)]
pub struct LiveSessionRow {
    pub id: i64,
    pub room_id: i64,
    pub record_id: i64,
    pub stream_id: i64,
    pub backend: String,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LiveSessionRow> for LiveSession {
    type Error = String;

    fn try_from(row: LiveSessionRow) -> Result<Self, Self::Error> {
        Ok(LiveSession {
            id: row.id,
            room_id: row.room_id,
            record_id: row.record_id,
            stream_id: row.stream_id,
            backend: row.backend.parse()?,
            remark: row.remark,
            created_at: row.created_at,
        })
    }
}

/// Outcome of probing one session during a sweep. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub session_id: i64,
    pub healthy: bool,
}
