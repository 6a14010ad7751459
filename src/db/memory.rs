//! In-process stores
//!
//! Records are sharded by user in a [`DashMap`]; holding a user's entry
//! serializes all writes for that user without blocking other users.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::{
    clock::Clock,
    db::{new_feed_entry, FeedCache, InterestStore},
    error::AppResult,
    models::{FeedContent, FeedEntry, FeedStatistics, InterestRecord, InterestStatistics},
    services::decay::DecayPolicy,
};

pub struct InMemoryInterestStore {
    records: DashMap<String, HashMap<String, InterestRecord>>,
    policy: DecayPolicy,
    clock: Arc<dyn Clock>,
}

impl InMemoryInterestStore {
    pub fn new(policy: DecayPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            policy,
            clock,
        }
    }

    /// Writes a record verbatim, bypassing decay (seeding and tests)
    pub fn insert_record(&self, record: InterestRecord) {
        self.records
            .entry(record.user_id.clone())
            .or_default()
            .insert(record.tag.clone(), record);
    }

    /// Stored record without decay
    pub fn raw_record(&self, user_id: &str, tag: &str) -> Option<InterestRecord> {
        self.records
            .get(user_id)
            .and_then(|tags| tags.get(tag).cloned())
    }
}

#[async_trait::async_trait]
impl InterestStore for InMemoryInterestStore {
    async fn get(&self, user_id: &str, tag: &str) -> AppResult<Option<InterestRecord>> {
        let now = self.clock.now();
        Ok(self
            .records
            .get(user_id)
            .and_then(|tags| tags.get(tag).map(|r| self.policy.decayed(r, now))))
    }

    async fn upsert(&self, user_id: &str, tag: &str, increment: f64) -> AppResult<InterestRecord> {
        let now = self.clock.now();
        let mut tags = self.records.entry(user_id.to_string()).or_default();
        let updated = self
            .policy
            .accumulate(tags.get(tag), user_id, tag, increment, now);
        tags.insert(tag.to_string(), updated.clone());
        Ok(updated)
    }

    async fn batch_upsert(&self, user_id: &str, increments: &HashMap<String, f64>) -> AppResult<()> {
        if increments.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut tags = self.records.entry(user_id.to_string()).or_default();
        for (tag, increment) in increments {
            let updated = self
                .policy
                .accumulate(tags.get(tag), user_id, tag, *increment, now);
            tags.insert(tag.clone(), updated);
        }
        Ok(())
    }

    async fn user_records(&self, user_id: &str) -> AppResult<Vec<InterestRecord>> {
        Ok(self
            .records
            .get(user_id)
            .map(|tags| tags.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn decay_sweep(&self, factor: f64, older_than: DateTime<Utc>) -> AppResult<u64> {
        let now = self.clock.now();
        let mut touched = 0;
        for mut user in self.records.iter_mut() {
            for record in user.value_mut().values_mut() {
                if record.last_updated < older_than {
                    *record = self.policy.swept(record, factor, now);
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn cleanup_below(&self, min_score: f64) -> AppResult<u64> {
        let mut deleted = 0;
        for mut user in self.records.iter_mut() {
            let tags = user.value_mut();
            let before = tags.len();
            tags.retain(|_, record| record.score >= min_score);
            deleted += (before - tags.len()) as u64;
        }
        self.records.retain(|_, tags| !tags.is_empty());
        Ok(deleted)
    }

    async fn active_users(&self, since: DateTime<Utc>) -> AppResult<Vec<String>> {
        let mut users: Vec<String> = self
            .records
            .iter()
            .filter(|user| user.value().values().any(|r| r.last_interaction >= since))
            .map(|user| user.key().clone())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn statistics(&self) -> AppResult<InterestStatistics> {
        let mut stats = InterestStatistics::default();
        let mut tags = HashSet::new();
        let mut total_score = 0.0;

        for user in self.records.iter() {
            if user.value().is_empty() {
                continue;
            }
            stats.user_count += 1;
            for record in user.value().values() {
                stats.record_count += 1;
                total_score += record.score;
                tags.insert(record.tag.clone());
            }
        }

        stats.tag_count = tags.len() as u64;
        if stats.record_count > 0 {
            stats.average_score = total_score / stats.record_count as f64;
        }
        Ok(stats)
    }

    fn decay_policy(&self) -> DecayPolicy {
        self.policy
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub struct InMemoryFeedCache {
    entries: DashMap<String, FeedEntry>,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryFeedCache {
    pub fn new(validity: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            validity,
            clock,
        }
    }

    /// Stores an entry as given, without re-stamping it
    pub fn insert_entry(&self, entry: FeedEntry) {
        self.entries.insert(entry.user_id.clone(), entry);
    }

    fn collect_where(&self, predicate: impl Fn(&FeedEntry) -> bool) -> Vec<FeedEntry> {
        let mut matching: Vec<FeedEntry> = self
            .entries
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        matching
    }
}

#[async_trait::async_trait]
impl FeedCache for InMemoryFeedCache {
    async fn get(&self, user_id: &str) -> AppResult<Option<FeedEntry>> {
        Ok(self.entries.get(user_id).map(|e| e.value().clone()))
    }

    async fn upsert(&self, user_id: &str, content: FeedContent) -> AppResult<FeedEntry> {
        let entry = new_feed_entry(user_id, content, self.clock.now(), self.validity)?;
        self.entries.insert(user_id.to_string(), entry.clone());
        Ok(entry)
    }

    async fn expiring(&self, within: Duration) -> AppResult<Vec<FeedEntry>> {
        let now = self.clock.now();
        let threshold = now + within;
        Ok(self.collect_where(|e| e.expires_at > now && e.expires_at <= threshold))
    }

    async fn expired(&self) -> AppResult<Vec<FeedEntry>> {
        let now = self.clock.now();
        Ok(self.collect_where(|e| e.expires_at <= now))
    }

    async fn purge_older_than(&self, days: i64) -> AppResult<u64> {
        let cutoff = self.clock.now() - Duration::days(days);
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at >= cutoff);
        Ok((before - self.entries.len()) as u64)
    }

    async fn users_missing_feed(&self, active_user_ids: &[String]) -> AppResult<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(active_user_ids
            .iter()
            .filter(|id| !self.entries.contains_key(id.as_str()))
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect())
    }

    async fn remove(&self, user_id: &str) -> AppResult<bool> {
        Ok(self.entries.remove(user_id).is_some())
    }

    async fn statistics(&self) -> AppResult<FeedStatistics> {
        let now = self.clock.now();
        let total = self.entries.len() as u64;
        let valid = self
            .entries
            .iter()
            .filter(|e| e.value().is_valid_at(now))
            .count() as u64;
        Ok(FeedStatistics {
            total,
            valid,
            expired: total - valid,
        })
    }

    fn validity_window(&self) -> Duration {
        self.validity
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use uuid::Uuid;

    fn interest_store(clock: &ManualClock) -> InMemoryInterestStore {
        InMemoryInterestStore::new(DecayPolicy::default(), Arc::new(clock.clone()))
    }

    fn feed_cache(clock: &ManualClock) -> InMemoryFeedCache {
        InMemoryFeedCache::new(Duration::minutes(30), Arc::new(clock.clone()))
    }

    fn content(post_ids: Vec<Uuid>, scores: Vec<f64>) -> FeedContent {
        FeedContent {
            author_ids: vec!["author".to_string(); post_ids.len()],
            requested_size: post_ids.len(),
            post_ids,
            scores,
            algorithm_version: "2.0/trending".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_applies_decay_before_increment() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);

        store.upsert("u1", "rust", 10.0).await.unwrap();
        clock.advance(Duration::days(2));
        let updated = store.upsert("u1", "rust", 5.0).await.unwrap();

        assert!((updated.score - (10.0 * 0.98_f64.powi(2) + 5.0)).abs() < 1e-9);
        assert_eq!(updated.interaction_count, 2);
    }

    #[tokio::test]
    async fn test_get_decays_without_writing_back() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);
        store.upsert("u1", "rust", 10.0).await.unwrap();

        clock.advance(Duration::days(1));
        let read = store.get("u1", "rust").await.unwrap().unwrap();

        assert!((read.score - 9.8).abs() < 1e-9);
        assert_eq!(store.raw_record("u1", "rust").unwrap().score, 10.0);
    }

    #[tokio::test]
    async fn test_batch_upsert_decays_each_tag_independently() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);

        store.upsert("u1", "rust", 10.0).await.unwrap();
        clock.advance(Duration::days(3));
        store.upsert("u1", "go", 10.0).await.unwrap();
        clock.advance(Duration::days(1));

        let increments = HashMap::from([("rust".to_string(), 1.0), ("go".to_string(), 1.0)]);
        store.batch_upsert("u1", &increments).await.unwrap();

        let rust = store.raw_record("u1", "rust").unwrap();
        let go = store.raw_record("u1", "go").unwrap();
        assert!((rust.score - (10.0 * 0.98_f64.powi(4) + 1.0)).abs() < 1e-9);
        assert!((go.score - (10.0 * 0.98 + 1.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_lose_no_increment() {
        let clock = ManualClock::default();
        let store = Arc::new(interest_store(&clock));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.upsert("u1", "rust", 1.0).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.raw_record("u1", "rust").unwrap();
        assert_eq!(record.score, 50.0);
        assert_eq!(record.interaction_count, 50);
    }

    #[tokio::test]
    async fn test_decay_sweep_only_touches_cold_records() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);
        store.upsert("u1", "cold", 10.0).await.unwrap();
        clock.advance(Duration::days(2));
        store.upsert("u1", "hot", 10.0).await.unwrap();

        let cutoff = clock.now() - Duration::days(1);
        let touched = store.decay_sweep(0.98, cutoff).await.unwrap();
        assert_eq!(touched, 1);
        assert_eq!(store.raw_record("u1", "hot").unwrap().score, 10.0);

        // swept records are stamped with now and are no longer cold
        let again = store.decay_sweep(0.98, cutoff).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);
        store.upsert("u1", "rust", 5.0).await.unwrap();
        store.upsert("u2", "noise", 0.001).await.unwrap();

        assert_eq!(store.cleanup_below(0.01).await.unwrap(), 1);
        assert_eq!(store.cleanup_below(0.01).await.unwrap(), 0);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.user_count, 1);
        assert_eq!(stats.record_count, 1);
    }

    #[tokio::test]
    async fn test_active_users_window() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);
        store.upsert("old", "rust", 1.0).await.unwrap();
        clock.advance(Duration::days(2));
        store.upsert("new", "rust", 1.0).await.unwrap();

        let active = store
            .active_users(clock.now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(active, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_does_not_count_as_activity() {
        let clock = ManualClock::default();
        let store = interest_store(&clock);
        store.upsert("dormant", "rust", 1.0).await.unwrap();
        clock.advance(Duration::days(3));

        store
            .decay_sweep(0.98, clock.now() - Duration::days(1))
            .await
            .unwrap();

        let active = store
            .active_users(clock.now() - Duration::hours(24))
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_feed_upsert_sets_expiry_window() {
        let clock = ManualClock::default();
        let cache = feed_cache(&clock);

        let entry = cache
            .upsert("u1", content(vec![Uuid::new_v4()], vec![1.0]))
            .await
            .unwrap();

        assert_eq!(entry.expires_at, entry.computed_at + Duration::minutes(30));
        assert!(cache.is_valid(&entry));
    }

    #[tokio::test]
    async fn test_feed_upsert_rejects_length_mismatch() {
        let clock = ManualClock::default();
        let cache = feed_cache(&clock);

        let result = cache
            .upsert("u1", content(vec![Uuid::new_v4()], vec![]))
            .await;
        assert!(result.is_err());
        assert!(cache.get("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_feed_upsert_replaces_previous_entry() {
        let clock = ManualClock::default();
        let cache = feed_cache(&clock);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        cache.upsert("u1", content(vec![first], vec![1.0])).await.unwrap();
        clock.advance(Duration::minutes(1));
        cache.upsert("u1", content(vec![second], vec![1.0])).await.unwrap();

        let entry = cache.get("u1").await.unwrap().unwrap();
        assert_eq!(entry.post_ids, vec![second]);
        assert_eq!(entry.author_ids, vec!["author".to_string()]);
        assert_eq!(cache.statistics().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_expiring_and_expired_are_disjoint() {
        let clock = ManualClock::default();
        let cache = feed_cache(&clock);

        cache.upsert("old", content(vec![], vec![])).await.unwrap();
        clock.advance(Duration::minutes(27));
        cache.upsert("soon", content(vec![], vec![])).await.unwrap();
        clock.advance(Duration::minutes(26));
        // old expired 23 minutes ago, soon expires in 4 minutes

        let expiring = cache.expiring(Duration::minutes(5)).await.unwrap();
        let expired = cache.expired().await.unwrap();

        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].user_id, "soon");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].user_id, "old");
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let clock = ManualClock::default();
        let cache = feed_cache(&clock);
        cache.upsert("ancient", content(vec![], vec![])).await.unwrap();
        clock.advance(Duration::days(8));
        cache.upsert("fresh", content(vec![], vec![])).await.unwrap();

        assert_eq!(cache.purge_older_than(7).await.unwrap(), 1);
        assert!(cache.get("ancient").await.unwrap().is_none());
        assert!(cache.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_users_missing_feed_is_set_difference() {
        let clock = ManualClock::default();
        let cache = feed_cache(&clock);
        cache.upsert("u1", content(vec![], vec![])).await.unwrap();

        let active = vec![
            "u1".to_string(),
            "u2".to_string(),
            "u3".to_string(),
            "u2".to_string(),
        ];
        let missing = cache.users_missing_feed(&active).await.unwrap();
        assert_eq!(missing, vec!["u2".to_string(), "u3".to_string()]);
    }
}
