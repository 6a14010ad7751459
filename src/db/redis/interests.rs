use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    cached,
    db::{
        redis::{Cache, CacheKey},
        InterestStore,
    },
    error::AppResult,
    models::{InterestRecord, InterestStatistics},
    services::decay::DecayPolicy,
};

/// Interest store decorator caching raw per-user records in Redis
///
/// Records are cached undecayed, so decay is still evaluated at read time
/// and a cached entry never serves a stale score for its age.
///
/// Data keys embed a global epoch and a per-user generation, both read
/// before the inner store. Writes bump the counter after the inner write
/// completes, so a fill queued by a reader that raced the write lands on a
/// key no later read will look up. Superseded keys expire after `ttl_secs`.
pub struct CachedInterestStore {
    inner: Arc<dyn InterestStore>,
    cache: Cache,
    ttl_secs: u64,
}

impl CachedInterestStore {
    pub fn new(inner: Arc<dyn InterestStore>, cache: Cache, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }

    /// Data key for the user's current epoch and generation
    async fn interests_key(&self, user_id: &str) -> AppResult<CacheKey> {
        let counters = self
            .cache
            .counters(&[
                CacheKey::InterestEpoch,
                CacheKey::InterestGeneration(user_id.to_string()),
            ])
            .await?;
        Ok(CacheKey::UserInterests {
            user_id: user_id.to_string(),
            epoch: counters.first().copied().unwrap_or_default(),
            generation: counters.get(1).copied().unwrap_or_default(),
        })
    }

    async fn invalidate_user(&self, user_id: &str) {
        let key = CacheKey::InterestGeneration(user_id.to_string());
        if let Err(e) = self.cache.increment(&key).await {
            tracing::error!(error = %e, user_id = %user_id, "Failed to invalidate cached interests");
        }
    }

    async fn invalidate_all(&self) {
        if let Err(e) = self.cache.increment(&CacheKey::InterestEpoch).await {
            tracing::error!(error = %e, "Failed to invalidate cached interests");
        }
        self.cache
            .delete_pattern_in_background(CacheKey::all_user_interests());
    }
}

#[async_trait::async_trait]
impl InterestStore for CachedInterestStore {
    async fn get(&self, user_id: &str, tag: &str) -> AppResult<Option<InterestRecord>> {
        self.inner.get(user_id, tag).await
    }

    async fn upsert(&self, user_id: &str, tag: &str, increment: f64) -> AppResult<InterestRecord> {
        let record = self.inner.upsert(user_id, tag, increment).await?;
        self.invalidate_user(user_id).await;
        Ok(record)
    }

    async fn batch_upsert(&self, user_id: &str, increments: &HashMap<String, f64>) -> AppResult<()> {
        self.inner.batch_upsert(user_id, increments).await?;
        self.invalidate_user(user_id).await;
        Ok(())
    }

    async fn user_records(&self, user_id: &str) -> AppResult<Vec<InterestRecord>> {
        let key = match self.interests_key(user_id).await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Cache generation unavailable, reading through");
                return self.inner.user_records(user_id).await;
            }
        };
        cached!(self.cache, key, self.ttl_secs, self.inner.user_records(user_id))
    }

    async fn decay_sweep(&self, factor: f64, older_than: DateTime<Utc>) -> AppResult<u64> {
        let touched = self.inner.decay_sweep(factor, older_than).await?;
        if touched > 0 {
            self.invalidate_all().await;
        }
        Ok(touched)
    }

    async fn cleanup_below(&self, min_score: f64) -> AppResult<u64> {
        let deleted = self.inner.cleanup_below(min_score).await?;
        if deleted > 0 {
            self.invalidate_all().await;
        }
        Ok(deleted)
    }

    async fn active_users(&self, since: DateTime<Utc>) -> AppResult<Vec<String>> {
        self.inner.active_users(since).await
    }

    async fn statistics(&self) -> AppResult<InterestStatistics> {
        self.inner.statistics().await
    }

    fn decay_policy(&self) -> DecayPolicy {
        self.inner.decay_policy()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }
}
