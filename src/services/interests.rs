use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::instrument;

use crate::{
    db::InterestStore,
    error::{AppError, AppResult},
    models::{InteractionEvent, InteractionType, InterestStatistics, TagScore},
    services::decay::DecayPolicy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct InterestSettings {
    pub daily_decay_rate: f64,
    pub min_score: f64,
    pub sweep_decay_factor: f64,
    /// Records untouched for at least this long are swept
    pub sweep_age: chrono::Duration,
}

impl Default for InterestSettings {
    fn default() -> Self {
        Self {
            daily_decay_rate: 0.98,
            min_score: 0.01,
            sweep_decay_factor: 0.98,
            sweep_age: chrono::Duration::hours(24),
        }
    }
}

impl InterestSettings {
    pub fn decay_policy(&self) -> DecayPolicy {
        DecayPolicy {
            daily_rate: self.daily_decay_rate,
            min_score: self.min_score,
        }
    }
}

/// Score contribution of one interaction to each of its tags
///
/// Ratings scale the `rate` weight linearly from 0.2 (one star) to 1.0
/// (five stars). A `rate` event without a rating counts at full weight.
pub fn interaction_weight(kind: InteractionType, rating: Option<f64>) -> AppResult<f64> {
    let base = kind.base_weight();
    if kind != InteractionType::Rate {
        return Ok(base);
    }

    match rating {
        None => Ok(base),
        Some(r) if r.is_finite() && (1.0..=5.0).contains(&r) => {
            Ok(base * (0.2 + 0.8 * (r - 1.0) / 4.0))
        }
        Some(r) => Err(AppError::InvalidInput(format!(
            "Rating must be between 1 and 5, got {}",
            r
        ))),
    }
}

/// Trims tags and drops empties and repeats, keeping first-seen order
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

/// Cosine similarity of two tag vectors, in [0, 1]
pub fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(tag, x)| b.get(tag).map(|y| x * y))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.values().map(|y| y * y).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Turns interactions into interest and answers profile queries
pub struct InterestService {
    store: Arc<dyn InterestStore>,
    settings: InterestSettings,
}

impl InterestService {
    pub fn new(store: Arc<dyn InterestStore>, settings: InterestSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> Arc<dyn InterestStore> {
        Arc::clone(&self.store)
    }

    /// Applies one interaction to every tag it carries
    ///
    /// Never triggers a feed recomputation. Failures are logged and
    /// returned so the delivery mechanism can retry.
    #[instrument(skip(self, event), fields(user_id = %event.user_id, kind = %event.interaction_type))]
    pub async fn record_interaction(&self, event: &InteractionEvent) -> AppResult<()> {
        let weight = interaction_weight(event.interaction_type, event.rating)?;

        let tags = normalize_tags(&event.tags);
        if tags.is_empty() {
            tracing::debug!("Interaction carries no usable tags, skipping");
            return Ok(());
        }

        let increments: HashMap<String, f64> = tags.into_iter().map(|t| (t, weight)).collect();
        if let Err(e) = self.store.batch_upsert(&event.user_id, &increments).await {
            tracing::error!(error = %e, "Failed to record interaction");
            return Err(e);
        }

        tracing::debug!(tags = increments.len(), weight, "Interaction recorded");
        Ok(())
    }

    /// Every reportable interest, decayed to now
    pub async fn get_user_interests(&self, user_id: &str) -> AppResult<HashMap<String, f64>> {
        let interests = self.store.top_interests(user_id, usize::MAX).await?;
        Ok(interests.into_iter().map(|t| (t.tag, t.score)).collect())
    }

    pub async fn get_top_interests(&self, user_id: &str, n: usize) -> AppResult<Vec<TagScore>> {
        self.store.top_interests(user_id, n).await
    }

    pub async fn get_user_similarity(&self, user_a: &str, user_b: &str) -> AppResult<f64> {
        let (a, b) = tokio::try_join!(
            self.get_user_interests(user_a),
            self.get_user_interests(user_b)
        )?;
        Ok(cosine_similarity(&a, &b))
    }

    /// Batch decay of interests untouched for the configured sweep age
    pub async fn decay_interests(&self) -> AppResult<u64> {
        let older_than = self.store.now() - self.settings.sweep_age;
        let touched = self
            .store
            .decay_sweep(self.settings.sweep_decay_factor, older_than)
            .await?;
        tracing::info!(touched, "Interest decay sweep finished");
        Ok(touched)
    }

    pub async fn cleanup_low_score_interests(&self) -> AppResult<u64> {
        let deleted = self.store.cleanup_below(self.settings.min_score).await?;
        tracing::info!(deleted, "Low-score interests removed");
        Ok(deleted)
    }

    pub async fn interest_statistics(&self) -> AppResult<InterestStatistics> {
        self.store.statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, db::InMemoryInterestStore};
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn service(clock: &ManualClock) -> (InterestService, Arc<InMemoryInterestStore>) {
        let settings = InterestSettings::default();
        let store = Arc::new(InMemoryInterestStore::new(
            settings.decay_policy(),
            Arc::new(clock.clone()),
        ));
        (InterestService::new(store.clone(), settings), store)
    }

    fn event(user: &str, tags: &[&str], kind: InteractionType, rating: Option<f64>) -> InteractionEvent {
        InteractionEvent {
            user_id: user.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            interaction_type: kind,
            rating,
        }
    }

    #[test]
    fn test_weights() {
        assert_eq!(interaction_weight(InteractionType::View, None).unwrap(), 1.0);
        assert_eq!(interaction_weight(InteractionType::Save, None).unwrap(), 3.0);
        assert_eq!(interaction_weight(InteractionType::Comment, Some(1.0)).unwrap(), 2.0);
        assert_eq!(interaction_weight(InteractionType::Rate, None).unwrap(), 5.0);
        assert_eq!(interaction_weight(InteractionType::Rate, Some(5.0)).unwrap(), 5.0);
        assert!((interaction_weight(InteractionType::Rate, Some(1.0)).unwrap() - 1.0).abs() < 1e-9);
        assert!((interaction_weight(InteractionType::Rate, Some(3.0)).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_rating_rejected() {
        assert_err!(interaction_weight(InteractionType::Rate, Some(0.0)));
        assert_err!(interaction_weight(InteractionType::Rate, Some(6.0)));
        assert_err!(interaction_weight(InteractionType::Rate, Some(f64::NAN)));
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " rust ".to_string(),
            "".to_string(),
            "Rust".to_string(),
            "rust".to_string(),
            "   ".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["rust".to_string(), "Rust".to_string()]);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = HashMap::from([("rust".to_string(), 3.0), ("go".to_string(), 4.0)]);
        let b = HashMap::from([("cooking".to_string(), 1.0)]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &HashMap::new()), 0.0);

        let c = HashMap::from([("rust".to_string(), 3.0)]);
        assert!((cosine_similarity(&a, &c) - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_record_interaction_weights_every_tag() {
        let clock = ManualClock::default();
        let (service, _store) = service(&clock);

        service
            .record_interaction(&event("u1", &["rust", "systems"], InteractionType::Save, None))
            .await
            .unwrap();
        service
            .record_interaction(&event("u1", &["rust"], InteractionType::View, None))
            .await
            .unwrap();

        let interests = service.get_user_interests("u1").await.unwrap();
        assert_eq!(interests["rust"], 4.0);
        assert_eq!(interests["systems"], 3.0);
    }

    #[tokio::test]
    async fn test_views_and_top_rating_favour_rated_tag() {
        let clock = ManualClock::default();
        let (service, _store) = service(&clock);

        for _ in 0..3 {
            service
                .record_interaction(&event("u1", &["rust", "systems"], InteractionType::View, None))
                .await
                .unwrap();
        }
        service
            .record_interaction(&event("u1", &["rust"], InteractionType::Rate, Some(5.0)))
            .await
            .unwrap();

        let interests = service.get_user_interests("u1").await.unwrap();
        assert_eq!(interests["rust"], 8.0);
        assert_eq!(interests["systems"], 3.0);
    }

    #[tokio::test]
    async fn test_record_without_usable_tags_is_noop() {
        let clock = ManualClock::default();
        let (service, store) = service(&clock);

        assert_ok!(
            service
                .record_interaction(&event("u1", &[" ", ""], InteractionType::Save, None))
                .await
        );

        assert_eq!(store.statistics().await.unwrap().record_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_rating_records_nothing() {
        let clock = ManualClock::default();
        let (service, store) = service(&clock);

        let result = service
            .record_interaction(&event("u1", &["rust"], InteractionType::Rate, Some(9.0)))
            .await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert!(store.raw_record("u1", "rust").is_none());
    }

    #[tokio::test]
    async fn test_similarity_between_users() {
        let clock = ManualClock::default();
        let (service, _store) = service(&clock);
        for user in ["a", "b"] {
            service
                .record_interaction(&event(user, &["rust"], InteractionType::Save, None))
                .await
                .unwrap();
        }
        service
            .record_interaction(&event("c", &["cooking"], InteractionType::Save, None))
            .await
            .unwrap();

        assert!((service.get_user_similarity("a", "b").await.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(service.get_user_similarity("a", "c").await.unwrap(), 0.0);
        assert_eq!(service.get_user_similarity("a", "nobody").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_decay_then_cleanup_converges() {
        let clock = ManualClock::default();
        let (service, _store) = service(&clock);
        service
            .record_interaction(&event("u1", &["rust"], InteractionType::View, None))
            .await
            .unwrap();

        // 0.98^250 ≈ 0.0064, below the cleanup threshold
        clock.advance(Duration::days(250));
        assert_eq!(service.decay_interests().await.unwrap(), 1);
        assert_eq!(service.decay_interests().await.unwrap(), 0);
        assert_eq!(service.cleanup_low_score_interests().await.unwrap(), 1);
        assert_eq!(service.cleanup_low_score_interests().await.unwrap(), 0);
        assert!(service.get_user_interests("u1").await.unwrap().is_empty());
    }
}
