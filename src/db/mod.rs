use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{FeedContent, FeedEntry, FeedStatistics, InterestRecord, InterestStatistics, TagScore},
    services::decay::DecayPolicy,
};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{InMemoryFeedCache, InMemoryInterestStore};
pub use postgres::{create_pool, run_migrations, PgFeedCache, PgInterestStore};
pub use redis::{create_redis_client, Cache, CacheKey, CachedInterestStore};

/// Durable (user, tag) → decaying affinity mapping
///
/// Every score leaving the store is decayed to the store's "now". Writes
/// are atomic per (user, tag): concurrent increments are never lost.
#[async_trait::async_trait]
pub trait InterestStore: Send + Sync {
    /// Record decayed to now; the decayed value is not written back
    async fn get(&self, user_id: &str, tag: &str) -> AppResult<Option<InterestRecord>>;

    /// Decay-then-add for one tag, creating the record if absent
    async fn upsert(&self, user_id: &str, tag: &str, increment: f64) -> AppResult<InterestRecord>;

    /// Same as [`InterestStore::upsert`] for many tags in one read-modify-write pass
    async fn batch_upsert(&self, user_id: &str, increments: &HashMap<String, f64>) -> AppResult<()>;

    /// All stored records for a user, undecayed
    async fn user_records(&self, user_id: &str) -> AppResult<Vec<InterestRecord>>;

    /// Top `n` tags by decayed score, evaluated at a single instant
    async fn top_interests(&self, user_id: &str, n: usize) -> AppResult<Vec<TagScore>> {
        let now = self.now();
        let records = self.user_records(user_id).await?;
        Ok(self.decay_policy().rank(&records, now, n))
    }

    /// Multiplies every record last touched before `older_than` by `factor`
    /// (after folding in its pending decay) and stamps it with now
    async fn decay_sweep(&self, factor: f64, older_than: DateTime<Utc>) -> AppResult<u64>;

    /// Deletes records whose stored score is below `min_score`
    async fn cleanup_below(&self, min_score: f64) -> AppResult<u64>;

    /// Users with an interaction at or after `since`; sweeps do not count
    async fn active_users(&self, since: DateTime<Utc>) -> AppResult<Vec<String>>;

    async fn statistics(&self) -> AppResult<InterestStatistics>;

    fn decay_policy(&self) -> DecayPolicy;

    fn now(&self) -> DateTime<Utc>;
}

/// Durable user → cached ranking mapping with a validity window
///
/// Entries are replaced wholesale; concurrent writers for the same user
/// resolve as last writer wins.
#[async_trait::async_trait]
pub trait FeedCache: Send + Sync {
    async fn get(&self, user_id: &str) -> AppResult<Option<FeedEntry>>;

    fn is_valid(&self, entry: &FeedEntry) -> bool {
        entry.is_valid_at(self.now())
    }

    async fn upsert(&self, user_id: &str, content: FeedContent) -> AppResult<FeedEntry>;

    /// Entries that are still valid but expire within `within`
    async fn expiring(&self, within: Duration) -> AppResult<Vec<FeedEntry>>;

    async fn expired(&self) -> AppResult<Vec<FeedEntry>>;

    /// Deletes entries that expired more than `days` days ago
    async fn purge_older_than(&self, days: i64) -> AppResult<u64>;

    /// Subset of `active_user_ids` with no entry at all
    async fn users_missing_feed(&self, active_user_ids: &[String]) -> AppResult<Vec<String>>;

    async fn remove(&self, user_id: &str) -> AppResult<bool>;

    async fn statistics(&self) -> AppResult<FeedStatistics>;

    fn validity_window(&self) -> Duration;

    fn now(&self) -> DateTime<Utc>;
}

/// Builds a fresh entry stamped at `now`, rejecting mismatched sequences
pub(crate) fn new_feed_entry(
    user_id: &str,
    content: FeedContent,
    now: DateTime<Utc>,
    validity: Duration,
) -> AppResult<FeedEntry> {
    let entry = FeedEntry {
        user_id: user_id.to_string(),
        post_ids: content.post_ids,
        author_ids: content.author_ids,
        scores: content.scores,
        algorithm_version: content.algorithm_version,
        requested_size: content.requested_size,
        computed_at: now,
        expires_at: now + validity,
    };

    if !entry.is_consistent() {
        return Err(AppError::InvalidInput(format!(
            "Feed for user {} has {} posts, {} authors and {} scores",
            user_id,
            entry.post_ids.len(),
            entry.author_ids.len(),
            entry.scores.len()
        )));
    }
    Ok(entry)
}
