use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{join_url, stream_name, BackendError, StreamingBackend};
use crate::config::RelayConfig;
use crate::models::BackendKind;

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    code: i64,
    #[serde(default)]
    streams: Vec<RelayStream>,
}

#[derive(Debug, Deserialize)]
struct RelayStream {
    app: String,
    name: String,
    #[serde(default)]
    publish: Option<PublishState>,
}

#[derive(Debug, Deserialize)]
struct PublishState {
    active: bool,
}

const DEFAULT_PAGE_SIZE: usize = 1000;
const MAX_PAGES: usize = 50;

/// Self-hosted relay exposing an SRS-style `/api/v1/streams` listing.
///
/// The listing is paged with `start`/`count`. A room counts as not live only
/// after a short page proves the listing was read to the end.
pub struct RelayBackend {
    http: reqwest::Client,
    config: RelayConfig,
    page_size: usize,
}

impl RelayBackend {
    pub fn new(http: reqwest::Client, config: RelayConfig) -> Self {
        Self {
            http,
            config,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn fetch_page(&self, start: usize) -> Result<Vec<RelayStream>, BackendError> {
        let url = join_url(
            &self.config.api_base,
            &format!("api/v1/streams?start={}&count={}", start, self.page_size),
        );
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(BackendError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body: StreamsResponse = response.json().await?;
        if body.code != 0 {
            return Err(BackendError::Api { code: body.code });
        }
        Ok(body.streams)
    }
}

#[async_trait]
impl StreamingBackend for RelayBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relay
    }

    async fn is_live(&self, room_id: i64) -> Result<bool, BackendError> {
        let name = stream_name(room_id);
        let mut listed = 0;

        for page in 0..MAX_PAGES {
            let streams = self.fetch_page(page * self.page_size).await?;
            listed += streams.len();

            let live = streams.iter().any(|s| {
                s.app == self.config.app
                    && s.name == name
                    && s.publish.as_ref().map(|p| p.active).unwrap_or(false)
            });
            if live {
                debug!(room_id, listed, "relay stream publishing");
                return Ok(true);
            }
            if streams.len() < self.page_size {
                debug!(room_id, listed, "relay stream not publishing");
                return Ok(false);
            }
        }

        Err(BackendError::Incomplete { listed })
    }

    fn playback_url(&self, room_id: i64) -> String {
        join_url(
            &self.config.pull_base,
            &format!("{}/{}.flv", self.config.app, stream_name(room_id)),
        )
    }
}
