//! Thin capability over a Redis-streams log with consumer-group semantics.
//!
//! Every service talks to the bus through [`StreamBus`]: idempotent group
//! creation, blocking group reads, appends, and best-effort acks. Connection
//! loss is the caller's signal to drop the handle and reconnect through
//! [`Backoff`]; nothing here retries silently.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker unreachable: {0}")]
    Connect(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl BusError {
    /// Connection-shaped errors trigger the reconnect path; everything else
    /// gets the short fixed retry sleep.
    pub fn is_connection(&self) -> bool {
        match self {
            BusError::Connect(_) => true,
            BusError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
        }
    }
}

/// One log entry: the broker-assigned id and the JSON payload carried in the
/// `data` field.
#[derive(Debug, Clone)]
pub struct BusEntry {
    pub id: String,
    pub data: String,
}

pub struct StreamBus {
    conn: MultiplexedConnection,
}

impl StreamBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Connect(e.to_string()))?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        debug!(url, "connected to broker");
        Ok(Self { conn })
    }

    /// Create `group` on `stream` (with stream auto-creation). A group that
    /// already exists is not an error.
    pub async fn ensure_group(&mut self, stream: &str, group: &str) -> Result<(), BusError> {
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;
        match created {
            Ok(()) => {
                info!(stream, group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking group read from a single stream. Entries without a readable
    /// `data` field are acked and skipped here so they can never poison the
    /// group.
    pub async fn read(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<BusEntry>, BusError> {
        let tagged = self
            .read_any(&[stream], group, consumer, count, block_ms)
            .await?;
        Ok(tagged.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Blocking group read across several streams, tagging each entry with
    /// the stream it came from.
    pub async fn read_any(
        &mut self,
        streams: &[&str],
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<(String, BusEntry)>, BusError> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let markers: Vec<&str> = streams.iter().map(|_| ">").collect();
        let reply: StreamReadReply = self.conn.xread_options(streams, &markers, &opts).await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for sid in key.ids {
                let data: Option<String> = sid.get("data");
                match data {
                    Some(data) => entries.push((key.key.clone(), BusEntry { id: sid.id, data })),
                    None => {
                        warn!(stream = %key.key, entry = %sid.id, "entry missing data field, acking and skipping");
                        self.ack(&key.key, group, &sid.id).await;
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Append a JSON payload as the single `data` field. Returns the
    /// broker-assigned entry id.
    pub async fn append(&mut self, stream: &str, json: &str) -> Result<String, BusError> {
        let id: String = self.conn.xadd(stream, "*", &[("data", json)]).await?;
        Ok(id)
    }

    /// Best-effort ack: failures are logged and swallowed so one bad ack
    /// never stalls the consume loop.
    pub async fn ack(&mut self, stream: &str, group: &str, id: &str) {
        let res: Result<i64, redis::RedisError> = self.conn.xack(stream, group, &[id]).await;
        if let Err(e) = res {
            warn!(stream, entry = %id, error = %e, "failed to ack entry");
        }
    }
}

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Exponential reconnect backoff: 1s -> 2s -> ... capped at 30s.
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: BACKOFF_BASE,
        }
    }

    pub fn reset(&mut self) {
        self.delay = BACKOFF_BASE;
    }

    /// The delay the next `sleep` will use.
    pub fn current(&self) -> Duration {
        self.delay
    }

    /// Sleep for the current delay, then double it (capped).
    pub async fn sleep(&mut self) {
        tokio::time::sleep(self.delay).await;
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
