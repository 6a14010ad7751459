use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::error::AppResult;

/// Keys scanned per SCAN round trip when deleting by pattern
const SCAN_BATCH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A user's records as of one (epoch, generation) pair
    UserInterests {
        user_id: String,
        epoch: u64,
        generation: u64,
    },
    /// Bumped when every user's interests change at once
    InterestEpoch,
    /// Bumped on each write to one user's interests
    InterestGeneration(String),
}

impl CacheKey {
    /// Glob matching every user's interest entry
    pub fn all_user_interests() -> &'static str {
        "interests:*"
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::UserInterests {
                user_id,
                epoch,
                generation,
            } => write!(f, "interests:{}:{}:{}", user_id, epoch, generation),
            CacheKey::InterestEpoch => write!(f, "interests-gen:epoch"),
            CacheKey::InterestGeneration(user_id) => write!(f, "interests-gen:user:{}", user_id),
        }
    }
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Operation queued for the background writer
#[derive(Debug)]
enum CacheWriteOp {
    Set { key: String, value: String, ttl: u64 },
    Delete { key: String },
    DeletePattern { pattern: String },
}

/// Read-through cache in front of slower stores
///
/// Reads go straight to Redis; writes and invalidations are queued and
/// applied in order by a single background task.
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteOp>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer to flush pending operations and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl Cache {
    /// Creates a new Cache instance and spawns its background writer
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        let handle = CacheWriterHandle { shutdown_tx };

        (cache, handle)
    }

    /// Applies queued operations until shutdown, then drains the queue
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteOp>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(op) = write_rx.recv() => {
                    if let Err(e) = Self::apply(&client, op).await {
                        tracing::error!(error = %e, "Failed to apply Redis cache operation");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache writer shutting down, flushing remaining operations");

                    while let Ok(op) = write_rx.try_recv() {
                        if let Err(e) = Self::apply(&client, op).await {
                            tracing::error!(error = %e, "Failed to flush cache operation during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn apply(client: &Client, op: CacheWriteOp) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        match op {
            CacheWriteOp::Set { key, value, ttl } => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            CacheWriteOp::Delete { key } => {
                let _: () = conn.del(key).await?;
            }
            CacheWriteOp::DeletePattern { pattern } => {
                let mut cursor: u64 = 0;
                let mut deleted = 0usize;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    if !keys.is_empty() {
                        deleted += keys.len();
                        let _: () = conn.del(keys).await?;
                    }
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                tracing::debug!(pattern = %pattern, deleted, "Invalidated cache keys");
            }
        }
        Ok(())
    }

    /// Retrieves and deserializes a cached value, `None` on a miss
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(format!("{}", key)).await?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Current values of counter keys, zero for keys never incremented
    pub async fn counters(&self, keys: &[CacheKey]) -> AppResult<Vec<u64>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let values: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(&names)
            .query_async(&mut conn)
            .await?;
        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    /// Increments a counter key immediately, bypassing the write queue
    pub async fn increment(&self, key: &CacheKey) -> AppResult<u64> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let value: u64 = conn.incr(key.to_string(), 1).await?;
        Ok(value)
    }

    /// Queues a write; returns without waiting for Redis
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        self.enqueue(CacheWriteOp::Set {
            key: format!("{}", key),
            value: json,
            ttl,
        });
    }

    pub fn delete_in_background(&self, key: &CacheKey) {
        self.enqueue(CacheWriteOp::Delete {
            key: format!("{}", key),
        });
    }

    /// Queues deletion of every key matching a glob pattern
    pub fn delete_pattern_in_background(&self, pattern: &str) {
        self.enqueue(CacheWriteOp::DeletePattern {
            pattern: pattern.to_string(),
        });
    }

    fn enqueue(&self, op: CacheWriteOp) {
        if let Err(e) = self.write_tx.send(op) {
            tracing::error!(error = %e, "Failed to queue cache operation");
        }
    }
}
