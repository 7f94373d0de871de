//! Key-expiration and channel feed.
//!
//! Redis delivers `__keyevent@<db>__:expired` notifications and ordinary
//! pub/sub messages over the same subscription connection. The subscriber
//! forwards both into a bounded mpsc channel so consumers read a plain
//! stream of [`StoreEvent`]s instead of registering callbacks.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use redis::{Client, RedisResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Raw delivery: channel name and decoded payload.
type Delivery = (String, RedisResult<String>);
type DeliveryStream = BoxStream<'static, Delivery>;

/// One item of the subscription feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A key with a TTL expired.
    KeyExpired { key: String },
    /// A message published on one of the extra channels.
    Message { channel: String, payload: String },
}

impl StoreEvent {
    /// Classify a raw pub/sub delivery.
    pub fn from_delivery(expired_channel: &str, channel: &str, payload: String) -> Self {
        if channel == expired_channel {
            StoreEvent::KeyExpired { key: payload }
        } else {
            StoreEvent::Message {
                channel: channel.to_string(),
                payload,
            }
        }
    }
}

/// Subscriber for key expirations of one logical database plus any number of
/// named channels.
pub struct KeyspaceSubscriber {
    client: Client,
    db: i64,
    channels: Vec<String>,
}

impl KeyspaceSubscriber {
    pub fn new(redis_url: &str, db: i64) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(redis_url)?,
            db,
            channels: Vec::new(),
        })
    }

    /// Also forward messages published on `channel`.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    pub fn expired_channel(db: i64) -> String {
        format!("__keyevent@{}__:expired", db)
    }

    /// Turn on expired-key events (`notify-keyspace-events Ex`).
    ///
    /// Managed Redis offerings often reject `CONFIG`; callers treat a failure
    /// here as a warning and rely on server-side configuration.
    pub async fn enable_expiry_notifications(&self) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async::<_, ()>(&mut conn)
            .await?;
        info!("Enabled expired keyspace notifications");
        Ok(())
    }

    /// Subscribe and spawn the forwarding task.
    ///
    /// The first subscription happens here so startup errors reach the
    /// caller. After that a dropped connection is re-established with capped
    /// exponential backoff and the receiver stays open. The task ends only
    /// when the receiver is closed.
    pub async fn spawn(
        self,
        buffer: usize,
    ) -> RedisResult<(mpsc::Receiver<StoreEvent>, JoinHandle<()>)> {
        let expired_channel = Self::expired_channel(self.db);
        let initial = subscribe(self.client.clone(), expired_channel.clone(), self.channels.clone()).await?;

        info!(
            expired_channel = %expired_channel,
            channels = ?self.channels,
            "Subscribed to keyspace feed"
        );

        let (tx, rx) = mpsc::channel(buffer.max(1));

        let client = self.client;
        let channels = self.channels;
        let resubscribe_channel = expired_channel.clone();
        let connect = move || subscribe(client.clone(), resubscribe_channel.clone(), channels.clone());

        let handle = tokio::spawn(supervise(connect, initial, expired_channel, tx));

        Ok((rx, handle))
    }
}

async fn subscribe(
    client: Client,
    expired_channel: String,
    channels: Vec<String>,
) -> RedisResult<DeliveryStream> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&expired_channel).await?;
    for channel in &channels {
        pubsub.subscribe(channel).await?;
    }

    Ok(pubsub
        .into_on_message()
        .map(|msg| (msg.get_channel_name().to_string(), msg.get_payload::<String>()))
        .boxed())
}

#[derive(Debug, PartialEq, Eq)]
enum FeedEnd {
    Disconnected,
    ReceiverClosed,
}

async fn forward(
    stream: &mut DeliveryStream,
    expired_channel: &str,
    tx: &mpsc::Sender<StoreEvent>,
) -> FeedEnd {
    loop {
        let delivery = tokio::select! {
            delivery = stream.next() => delivery,
            _ = tx.closed() => return FeedEnd::ReceiverClosed,
        };

        let Some((channel, payload)) = delivery else {
            return FeedEnd::Disconnected;
        };

        let payload = match payload {
            Ok(p) => p,
            Err(e) => {
                error!(error = ?e, channel = %channel, "Failed to get message payload");
                continue;
            }
        };

        let event = StoreEvent::from_delivery(expired_channel, &channel, payload);
        debug!(?event, "keyspace event");

        if tx.send(event).await.is_err() {
            return FeedEnd::ReceiverClosed;
        }
    }
}

/// Forward deliveries, resubscribing through `connect` whenever the
/// subscription ends.
async fn supervise<C, Fut>(
    mut connect: C,
    initial: DeliveryStream,
    expired_channel: String,
    tx: mpsc::Sender<StoreEvent>,
) where
    C: FnMut() -> Fut,
    Fut: Future<Output = RedisResult<DeliveryStream>>,
{
    let mut stream = initial;

    loop {
        if forward(&mut stream, &expired_channel, &tx).await == FeedEnd::ReceiverClosed {
            info!("Keyspace feed receiver closed");
            return;
        }
        warn!("Keyspace subscription ended, reconnecting");

        let mut delay = RECONNECT_INITIAL_DELAY;
        stream = loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tx.closed() => {
                    info!("Keyspace feed receiver closed");
                    return;
                }
            }

            match connect().await {
                Ok(stream) => {
                    info!(expired_channel = %expired_channel, "Resubscribed to keyspace feed");
                    break stream;
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Keyspace resubscribe failed");
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        };
    }
}
