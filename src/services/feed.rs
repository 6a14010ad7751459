use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::FeedCache,
    error::{AppError, AppResult},
    models::{FeedContent, FeedEntry, RecommendationRequest},
    services::recommendations::{version_tag, RecommendationEngine},
};

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Posts computed into each cached feed
    pub feed_size: usize,
    /// Deadline for one recomputation
    pub recompute_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            feed_size: 50,
            recompute_timeout: Duration::from_secs(5),
        }
    }
}

/// Serves recommendations from the feed cache, recomputing on demand
///
/// The cached feed is computed without author exclusion. A requested
/// exclusion is applied to the cached posts on read; when that leaves
/// fewer than `count` of a feed that is not exhausted, the request is
/// ranked live instead.
pub struct FeedService {
    cache: Arc<dyn FeedCache>,
    engine: Arc<RecommendationEngine>,
    settings: FeedSettings,
}

impl FeedService {
    pub fn new(
        cache: Arc<dyn FeedCache>,
        engine: Arc<RecommendationEngine>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            cache,
            engine,
            settings,
        }
    }

    /// Top `count` post ids for the user; never fails
    ///
    /// On a recomputation error or timeout the stale entry is served when
    /// one exists, otherwise the result is empty.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_recommendations(
        &self,
        user_id: &str,
        count: usize,
        exclude_author_id: Option<&str>,
    ) -> Vec<Uuid> {
        if count == 0 {
            return Vec::new();
        }

        let cached = match self.cached_entry(user_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Feed cache read failed");
                None
            }
        };

        let entry = match cached {
            Some(entry) if self.cache.is_valid(&entry) && covers(&entry, count) => {
                tracing::debug!("Feed cache hit");
                entry
            }
            stale => {
                tracing::debug!(stale = stale.is_some(), "Feed cache miss, recomputing");
                let size = count.max(self.settings.feed_size);
                match self.recompute(user_id, size).await {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, serving_stale = stale.is_some(), "Feed recomputation failed");
                        return stale
                            .map(|entry| entry.top_excluding(count, exclude_author_id))
                            .unwrap_or_default();
                    }
                }
            }
        };

        let ids = entry.top_excluding(count, exclude_author_id);
        match exclude_author_id {
            Some(author) if ids.len() < count && !entry.is_exhausted() => {
                tracing::debug!(author_id = %author, "Exclusion thinned the cached feed, ranking live");
                self.live_recommendations(user_id, count, author).await
            }
            _ => ids,
        }
    }

    /// Recomputes and stores the user's feed regardless of its state
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn refresh_feed(&self, user_id: &str) -> AppResult<FeedEntry> {
        self.recompute(user_id, self.settings.feed_size).await
    }

    /// Cached entry, with inconsistent entries discarded
    async fn cached_entry(&self, user_id: &str) -> AppResult<Option<FeedEntry>> {
        let Some(entry) = self.cache.get(user_id).await? else {
            return Ok(None);
        };

        if !entry.is_consistent() {
            let err = AppError::CorruptFeed(user_id.to_string());
            tracing::warn!(error = %err, "Discarding feed entry");
            self.cache.remove(user_id).await?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    async fn recompute(&self, user_id: &str, size: usize) -> AppResult<FeedEntry> {
        let request = RecommendationRequest::new(user_id, size);

        let work = async {
            let ranking = self.engine.recommend(&request).await?;
            let content = FeedContent::from_ranking(&ranking, version_tag(ranking.tier), size);
            self.cache.upsert(user_id, content).await
        };

        tokio::time::timeout(self.settings.recompute_timeout, work)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "Feed recomputation for {} exceeded {:?}",
                    user_id, self.settings.recompute_timeout
                ))
            })?
    }

    async fn live_recommendations(&self, user_id: &str, count: usize, author: &str) -> Vec<Uuid> {
        let request = RecommendationRequest::new(user_id, count).excluding_author(author);
        match tokio::time::timeout(
            self.settings.recompute_timeout,
            self.engine.recommend_or_empty(&request),
        )
        .await
        {
            Ok(ranking) => ranking.post_ids(),
            Err(_) => {
                tracing::warn!("Live recommendation timed out");
                Vec::new()
            }
        }
    }
}

/// An entry answers `count` when it was computed at least that long or
/// already holds every eligible post
fn covers(entry: &FeedEntry, count: usize) -> bool {
    entry.requested_size >= count || entry.is_exhausted()
}
