//! Upstream streaming backends.
//!
//! Neither backend pushes state changes, so liveness is always asked for.
//! A failed query is a [`BackendError`], never a "not live" answer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::BackendKind;

pub mod cdn;
pub mod relay;

pub use cdn::CdnBackend;
pub use relay::RelayBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("backend returned error code {code}")]
    Api { code: i64 },

    #[error("stream listing did not end after {listed} entries")]
    Incomplete { listed: usize },
}

#[async_trait]
pub trait StreamingBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether the room is currently publishing on this backend.
    async fn is_live(&self, room_id: i64) -> Result<bool, BackendError>;

    /// Playback URL used as the health probe target.
    fn playback_url(&self, room_id: i64) -> String;
}

/// Stream name a room publishes under on every backend.
pub fn stream_name(room_id: i64) -> String {
    format!("room_{}", room_id)
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Backends by kind, constructed once at startup and handed to both
/// reconcilers.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn StreamingBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn StreamingBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn StreamingBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn StreamingBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.backends.contains_key(kind))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
