use std::sync::Arc;

use crate::{
    clock::Clock,
    config::Config,
    db::{FeedCache, InterestStore},
    services::{
        catalog::ContentCatalog,
        feed::FeedService,
        interests::InterestService,
        maintenance::{MaintenanceScheduler, MaintenanceSettings},
        recommendations::RecommendationEngine,
    },
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub interests: Arc<InterestService>,
    pub feeds: Arc<FeedService>,
    pub feed_cache: Arc<dyn FeedCache>,
    pub catalog: Arc<dyn ContentCatalog>,
}

impl AppState {
    /// Wires the services over the given stores
    pub fn new(
        interest_store: Arc<dyn InterestStore>,
        feed_cache: Arc<dyn FeedCache>,
        catalog: Arc<dyn ContentCatalog>,
        config: &Config,
    ) -> Self {
        let interests = Arc::new(InterestService::new(
            Arc::clone(&interest_store),
            config.interest_settings(),
        ));
        let engine = Arc::new(RecommendationEngine::new(
            interest_store,
            Arc::clone(&catalog),
            config.engine_settings(),
        ));
        let feeds = Arc::new(FeedService::new(
            Arc::clone(&feed_cache),
            engine,
            config.feed_settings(),
        ));

        Self {
            interests,
            feeds,
            feed_cache,
            catalog,
        }
    }

    pub fn maintenance_scheduler(&self, settings: MaintenanceSettings) -> Arc<MaintenanceScheduler> {
        Arc::new(MaintenanceScheduler::new(
            Arc::clone(&self.interests),
            Arc::clone(&self.feeds),
            Arc::clone(&self.feed_cache),
            Arc::clone(&self.catalog),
            settings,
        ))
    }
}

/// Builds state over the in-process stores, all reading from `clock`
pub fn in_memory_state(
    catalog: Arc<dyn ContentCatalog>,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> AppState {
    let interest_store = Arc::new(crate::db::InMemoryInterestStore::new(
        config.interest_settings().decay_policy(),
        Arc::clone(&clock),
    ));
    let feed_cache = Arc::new(crate::db::InMemoryFeedCache::new(
        config.feed_validity(),
        clock,
    ));
    AppState::new(interest_store, feed_cache, catalog, config)
}
