use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{join_url, stream_name, BackendError, StreamingBackend};
use crate::config::CdnConfig;
use crate::models::BackendKind;

#[derive(Debug, Deserialize)]
struct StreamStateResponse {
    state: String,
}

/// CDN-push backend: the broadcaster publishes straight to the CDN, which
/// exposes a per-stream state endpoint.
pub struct CdnBackend {
    http: reqwest::Client,
    config: CdnConfig,
}

impl CdnBackend {
    pub fn new(http: reqwest::Client, config: CdnConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl StreamingBackend for CdnBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cdn
    }

    async fn is_live(&self, room_id: i64) -> Result<bool, BackendError> {
        let url = join_url(
            &self.config.api_base,
            &format!("v1/streams/{}/state", stream_name(room_id)),
        );

        let mut request = self.http.get(&url);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        // Unknown stream is an authoritative "not live".
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(BackendError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body: StreamStateResponse = response.json().await?;
        debug!(room_id, state = %body.state, "cdn stream state");
        Ok(body.state.eq_ignore_ascii_case("active"))
    }

    fn playback_url(&self, room_id: i64) -> String {
        join_url(
            &self.config.pull_base,
            &format!("{}/{}.m3u8", self.config.app, stream_name(room_id)),
        )
    }
}
