use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Receives log-write events published on the log channel.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write(&self, channel: &str, payload: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    source: Option<String>,
    message: String,
}

/// Re-emits published log records as tracing events.
///
/// JSON payloads of the form `{"level": "...", "source": "...", "message": "..."}`
/// keep their level; anything else is logged verbatim at info.
#[derive(Debug, Default, Clone)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn write(&self, channel: &str, payload: &str) -> Result<()> {
        let Ok(record) = serde_json::from_str::<LogRecord>(payload) else {
            info!(target: "liveness_service::published", channel, payload, "log event");
            return Ok(());
        };

        let source = record.source.as_deref().unwrap_or("unknown");
        match record.level.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("error") => {
                error!(target: "liveness_service::published", channel, source, "{}", record.message)
            }
            Some("warn") | Some("warning") => {
                warn!(target: "liveness_service::published", channel, source, "{}", record.message)
            }
            Some("debug") => {
                debug!(target: "liveness_service::published", channel, source, "{}", record.message)
            }
            _ => info!(target: "liveness_service::published", channel, source, "{}", record.message),
        }
        Ok(())
    }
}
