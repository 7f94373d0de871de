use std::sync::Arc;
use tracing::info;

use crate::db::SessionRepository;
use crate::error::Result;
use crate::metrics;
use crate::services::liveness_key::LivenessKey;

pub const REMARK_UNHEALTHY: &str = "unhealthy";

/// Convergence point shared by both reconcilers.
///
/// Delivery is at-least-once: the reactive and the scheduled path may tear
/// down the same session concurrently or one after the other. Sessions that
/// are already gone count as converged, never as an error.
#[derive(Clone)]
pub struct SessionTeardown {
    repo: Arc<dyn SessionRepository>,
}

impl SessionTeardown {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Mark and remove `ids`. Returns how many were still live.
    pub async fn teardown(&self, ids: &[i64], remark: &str) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = self.repo.mark_and_delete(ids, remark).await?;
        metrics::record_teardown(remark, removed);

        if removed < ids.len() as u64 {
            info!(
                requested = ids.len(),
                removed,
                remark,
                "Some sessions were already torn down"
            );
        }
        Ok(removed)
    }

    /// Tear down whatever sessions still match `key`.
    pub async fn teardown_key(&self, key: &LivenessKey, remark: &str) -> Result<u64> {
        let ids = self.repo.find_session_ids(key).await?;
        if ids.is_empty() {
            info!(key = %key, "No live session left for key, already converged");
            return Ok(0);
        }

        let removed = self.teardown(&ids, remark).await?;
        info!(key = %key, session_ids = ?ids, removed, remark, "Session torn down");
        Ok(removed)
    }
}
