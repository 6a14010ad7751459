use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::instrument;

use crate::{
    db::InterestStore,
    error::AppResult,
    models::{CandidateFilter, CandidatePost, Ranking, RecommendationRequest, ScoredPost, Tier},
    services::{
        catalog::ContentCatalog,
        ranking::{self, ScoringParams},
    },
};

/// Version stamped on every cached feed, suffixed with the producing tier
pub const ALGORITHM_VERSION: &str = "2.0";

pub fn version_tag(tier: Tier) -> String {
    format!("{}/{}", ALGORITHM_VERSION, tier)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Below this many published posts every user gets popularity ranking
    pub min_catalog_size: u64,
    /// Top-k interests used for personalization
    pub interest_profile_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_catalog_size: 20,
            interest_profile_size: 50,
        }
    }
}

/// Primary tier for a request
pub fn select_tier(catalog_size: u64, min_catalog_size: u64, interest_count: usize) -> Tier {
    if catalog_size < min_catalog_size {
        Tier::Popularity
    } else if interest_count > 0 {
        Tier::Personalized
    } else {
        Tier::Trending
    }
}

/// Tier used to top up a short primary result, if any
pub fn fill_tier(primary: Tier, produced: usize, requested: usize) -> Option<Tier> {
    match primary {
        Tier::Personalized if produced < requested => Some(Tier::Trending),
        _ => None,
    }
}

/// Tiered ranking over the catalog and a user's interest profile
pub struct RecommendationEngine {
    interests: Arc<dyn InterestStore>,
    catalog: Arc<dyn ContentCatalog>,
    settings: EngineSettings,
    params: ScoringParams,
}

impl RecommendationEngine {
    pub fn new(
        interests: Arc<dyn InterestStore>,
        catalog: Arc<dyn ContentCatalog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            interests,
            catalog,
            settings,
            params: ScoringParams::default(),
        }
    }

    /// Ranks up to `request.count` posts for the user
    ///
    /// Catalog failures propagate; interest store failures degrade to the
    /// cold-start path.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, count = request.count))]
    pub async fn recommend(&self, request: &RecommendationRequest) -> AppResult<Ranking> {
        let now = self.interests.now();

        let catalog_size = self.catalog.total_published_count().await?;

        let profile = if catalog_size >= self.settings.min_catalog_size {
            match self
                .interests
                .top_interests(&request.user_id, self.settings.interest_profile_size)
                .await
            {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(error = %e, "Interest lookup failed, ranking without profile");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let tier = select_tier(catalog_size, self.settings.min_catalog_size, profile.len());
        if request.count == 0 {
            return Ok(Ranking::empty(tier));
        }

        let filter = CandidateFilter {
            exclude_author_id: request.exclude_author_id.clone(),
            exclude_post_ids: request.exclude_post_ids.clone(),
        };
        let candidates: Vec<CandidatePost> = self
            .catalog
            .list_published_candidates(&filter)
            .await?
            .into_iter()
            .filter(|p| filter.admits(p))
            .collect();

        let mut posts = match tier {
            Tier::Popularity => ranking::rank(&candidates, request.count, tier, |p| {
                Some(ranking::popularity_score(p))
            }),
            Tier::Trending => self.trending(&candidates, request.count, now),
            Tier::Personalized => {
                let interests: HashMap<String, f64> =
                    profile.into_iter().map(|t| (t.tag, t.score)).collect();
                ranking::rank(&candidates, request.count, tier, |p| {
                    ranking::personalized_score(p, &interests, now, &self.params)
                })
            }
        };

        if let Some(fill) = fill_tier(tier, posts.len(), request.count) {
            let chosen: HashSet<_> = posts.iter().map(|p| p.post_id).collect();
            let remaining: Vec<CandidatePost> = candidates
                .into_iter()
                .filter(|p| !chosen.contains(&p.id))
                .collect();
            let missing = request.count - posts.len();
            let filler: Vec<ScoredPost> = match fill {
                Tier::Trending => self.trending(&remaining, missing, now),
                _ => Vec::new(),
            };
            tracing::debug!(personalized = posts.len(), filled = filler.len(), "Filled from trending");
            posts.extend(filler);
        }

        // a profile that matched nothing leaves only trending fill
        let tier = posts.first().map_or(tier, |p| p.tier);
        tracing::debug!(tier = %tier, returned = posts.len(), "Ranking computed");
        Ok(Ranking { tier, posts })
    }

    /// Same as [`recommend`](Self::recommend), with errors logged and absorbed
    pub async fn recommend_or_empty(&self, request: &RecommendationRequest) -> Ranking {
        match self.recommend(request).await {
            Ok(ranking) => ranking,
            Err(e) => {
                tracing::warn!(user_id = %request.user_id, error = %e, "Recommendation failed, returning empty ranking");
                Ranking::empty(Tier::Trending)
            }
        }
    }

    fn trending(
        &self,
        candidates: &[CandidatePost],
        count: usize,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<ScoredPost> {
        ranking::rank(candidates, count, Tier::Trending, |p| {
            Some(ranking::trending_score(p, now, &self.params))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        db::InMemoryInterestStore,
        error::AppError,
        services::{
            catalog::{InMemoryCatalog, MockContentCatalog},
            decay::DecayPolicy,
        },
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn post(author: &str, tags: &[&str], views: i64) -> CandidatePost {
        CandidatePost {
            id: Uuid::new_v4(),
            author_id: author.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            view_count: views,
            avg_rating: 3.0,
            rating_count: 2,
            created_at: Utc::now() - Duration::days(1),
            published_at: None,
        }
    }

    fn engine(
        catalog: Arc<dyn ContentCatalog>,
        clock: &ManualClock,
    ) -> (RecommendationEngine, Arc<InMemoryInterestStore>) {
        let store = Arc::new(InMemoryInterestStore::new(
            DecayPolicy::default(),
            Arc::new(clock.clone()),
        ));
        let engine = RecommendationEngine::new(store.clone(), catalog, EngineSettings::default());
        (engine, store)
    }

    #[test]
    fn test_select_tier() {
        assert_eq!(select_tier(10, 20, 5), Tier::Popularity);
        assert_eq!(select_tier(50, 20, 0), Tier::Trending);
        assert_eq!(select_tier(50, 20, 3), Tier::Personalized);
        assert_eq!(select_tier(20, 20, 1), Tier::Personalized);
    }

    #[test]
    fn test_fill_tier_only_tops_up_personalized() {
        assert_eq!(fill_tier(Tier::Personalized, 3, 10), Some(Tier::Trending));
        assert_eq!(fill_tier(Tier::Personalized, 10, 10), None);
        assert_eq!(fill_tier(Tier::Trending, 3, 10), None);
        assert_eq!(fill_tier(Tier::Popularity, 0, 10), None);
    }

    #[test]
    fn test_version_tag() {
        assert_eq!(version_tag(Tier::Trending), "2.0/trending");
    }

    #[tokio::test]
    async fn test_small_catalog_uses_popularity_even_with_interests() {
        let clock = ManualClock::default();
        let posts: Vec<CandidatePost> = (0..10).map(|i| post("a", &["rust"], i * 10)).collect();
        let (engine, store) = engine(Arc::new(InMemoryCatalog::with_posts(posts)), &clock);
        store.upsert("u1", "rust", 10.0).await.unwrap();

        let ranking = engine
            .recommend(&RecommendationRequest::new("u1", 5))
            .await
            .unwrap();

        assert_eq!(ranking.tier, Tier::Popularity);
        assert_eq!(ranking.posts.len(), 5);
        // views 90 + 2 ratings
        assert_eq!(ranking.posts[0].score, 92.0);
        assert!(ranking.posts.iter().all(|p| p.tier == Tier::Popularity));
    }

    #[tokio::test]
    async fn test_cold_start_returns_trending() {
        let clock = ManualClock::default();
        let posts: Vec<CandidatePost> = (0..50).map(|i| post("a", &["misc"], i)).collect();
        let (engine, _store) = engine(Arc::new(InMemoryCatalog::with_posts(posts)), &clock);

        let ranking = engine
            .recommend(&RecommendationRequest::new("newcomer", 10))
            .await
            .unwrap();

        assert_eq!(ranking.tier, Tier::Trending);
        assert_eq!(ranking.posts.len(), 10);
    }

    #[tokio::test]
    async fn test_exclusions_apply_to_every_tier() {
        let clock = ManualClock::default();
        let mut posts: Vec<CandidatePost> = (0..25).map(|i| post("other", &["rust"], i)).collect();
        posts.extend((0..5).map(|i| post("u1", &["rust"], 1_000 + i)));
        let excluded = posts[0].id;
        let (engine, store) = engine(Arc::new(InMemoryCatalog::with_posts(posts.clone())), &clock);

        let request = RecommendationRequest::new("u1", 100)
            .excluding_author("u1")
            .excluding_posts([excluded]);

        let trending = engine.recommend(&request).await.unwrap();
        store.upsert("u1", "rust", 5.0).await.unwrap();
        let personalized = engine.recommend(&request).await.unwrap();

        for ranking in [&trending, &personalized] {
            assert_eq!(ranking.posts.len(), 24);
            assert!(!ranking.post_ids().contains(&excluded));
            let own: HashSet<Uuid> = posts
                .iter()
                .filter(|p| p.author_id == "u1")
                .map(|p| p.id)
                .collect();
            assert!(ranking.post_ids().iter().all(|id| !own.contains(id)));
        }
        assert_eq!(personalized.tier, Tier::Personalized);
    }

    #[tokio::test]
    async fn test_interest_scenario_orders_by_affinity_then_fills() {
        let clock = ManualClock::default();
        let rust_systems = post("a", &["rust", "systems"], 10);
        let rust_only = post("a", &["rust"], 10);
        let cooking = post("a", &["cooking"], 10);
        let mut posts = vec![rust_systems.clone(), rust_only.clone(), cooking.clone()];
        posts.extend((0..20).map(|i| post("b", &["misc"], i)));
        let (engine, store) = engine(Arc::new(InMemoryCatalog::with_posts(posts)), &clock);

        for _ in 0..3 {
            let increments =
                HashMap::from([("rust".to_string(), 3.0), ("systems".to_string(), 1.0)]);
            store.batch_upsert("reader", &increments).await.unwrap();
        }

        let ranking = engine
            .recommend(&RecommendationRequest::new("reader", 5))
            .await
            .unwrap();

        assert_eq!(ranking.tier, Tier::Personalized);
        assert_eq!(ranking.posts.len(), 5);
        assert_eq!(ranking.posts[0].post_id, rust_systems.id);
        assert_eq!(ranking.posts[1].post_id, rust_only.id);
        assert_eq!(ranking.posts[0].tier, Tier::Personalized);
        assert!(ranking.posts[2..].iter().all(|p| p.tier == Tier::Trending));

        let ids = ranking.post_ids();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn test_unmatched_profile_reports_trending() {
        let clock = ManualClock::default();
        let posts: Vec<CandidatePost> = (0..30).map(|i| post("a", &["misc"], i)).collect();
        let (engine, store) = engine(Arc::new(InMemoryCatalog::with_posts(posts)), &clock);
        store.upsert("u1", "cooking", 5.0).await.unwrap();

        let ranking = engine
            .recommend(&RecommendationRequest::new("u1", 10))
            .await
            .unwrap();

        assert_eq!(ranking.posts.len(), 10);
        assert!(ranking.posts.iter().all(|p| p.tier == Tier::Trending));
        assert_eq!(ranking.tier, Tier::Trending);
        assert_eq!(version_tag(ranking.tier), "2.0/trending");
    }

    #[tokio::test]
    async fn test_catalog_failure_is_absorbed() {
        let clock = ManualClock::default();
        let mut catalog = MockContentCatalog::new();
        catalog
            .expect_total_published_count()
            .returning(|| Err(AppError::Catalog("connection refused".to_string())));
        let (engine, _store) = engine(Arc::new(catalog), &clock);

        let request = RecommendationRequest::new("u1", 10);
        assert!(engine.recommend(&request).await.is_err());
        assert!(engine.recommend_or_empty(&request).await.posts.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_filter_is_reapplied() {
        let clock = ManualClock::default();
        let mine = post("u1", &["rust"], 100);
        let theirs = post("u2", &["rust"], 1);
        let returned = vec![mine.clone(), theirs.clone()];

        let mut catalog = MockContentCatalog::new();
        catalog.expect_total_published_count().returning(|| Ok(5));
        catalog
            .expect_list_published_candidates()
            .times(1)
            .returning(move |_| Ok(returned.clone()));
        let (engine, _store) = engine(Arc::new(catalog), &clock);

        let ranking = engine
            .recommend(&RecommendationRequest::new("u1", 10).excluding_author("u1"))
            .await
            .unwrap();

        assert_eq!(ranking.post_ids(), vec![theirs.id]);
    }
}
