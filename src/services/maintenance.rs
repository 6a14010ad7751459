use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::instrument;

use crate::{
    db::FeedCache,
    error::AppResult,
    services::{catalog::ContentCatalog, feed::FeedService, interests::InterestService},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceSettings {
    pub interval: Duration,
    /// Valid feeds expiring within this window are refreshed ahead of time
    pub expiring_within: chrono::Duration,
    /// Expired feeds are deleted this many days past expiry
    pub retention_days: i64,
    /// Users with interest updates inside this window count as active
    pub activity_window: chrono::Duration,
    pub max_refresh_per_cycle: usize,
    pub refresh_concurrency: usize,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            expiring_within: chrono::Duration::minutes(5),
            retention_days: 7,
            activity_window: chrono::Duration::hours(24),
            max_refresh_per_cycle: 500,
            refresh_concurrency: 8,
        }
    }
}

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub decayed: u64,
    pub cleaned: u64,
    pub refreshed: u64,
    pub refresh_failures: u64,
    pub purged: u64,
}

/// Periodic decay, cleanup, proactive refresh and eviction
///
/// Every step is re-runnable: a failed step is logged and the next cycle
/// picks up whatever it left behind.
pub struct MaintenanceScheduler {
    interests: Arc<InterestService>,
    feeds: Arc<FeedService>,
    feed_cache: Arc<dyn FeedCache>,
    catalog: Arc<dyn ContentCatalog>,
    settings: MaintenanceSettings,
}

/// Handle for stopping a spawned scheduler
pub struct MaintenanceHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stops the loop after any in-flight cycle completes
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Maintenance task ended abnormally");
        }
        tracing::info!("Maintenance scheduler stopped");
    }
}

impl MaintenanceScheduler {
    pub fn new(
        interests: Arc<InterestService>,
        feeds: Arc<FeedService>,
        feed_cache: Arc<dyn FeedCache>,
        catalog: Arc<dyn ContentCatalog>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            interests,
            feeds,
            feed_cache,
            catalog,
            settings,
        }
    }

    /// Runs cycles on the configured interval until shut down
    pub fn spawn(self: Arc<Self>) -> MaintenanceHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.settings.interval, self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?self.settings.interval, "Maintenance scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        MaintenanceHandle { shutdown_tx, task }
    }

    /// Decay sweep, cleanup, refresh, purge, then feed statistics
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.interests.decay_interests().await {
            Ok(n) => report.decayed = n,
            Err(e) => tracing::error!(error = %e, "Interest decay sweep failed"),
        }

        match self.interests.cleanup_low_score_interests().await {
            Ok(n) => report.cleaned = n,
            Err(e) => tracing::error!(error = %e, "Interest cleanup failed"),
        }

        match self.refresh_targets().await {
            Ok(targets) => {
                let (refreshed, failures) = self.refresh_all(targets).await;
                report.refreshed = refreshed;
                report.refresh_failures = failures;
            }
            Err(e) => tracing::error!(error = %e, "Could not select feeds to refresh"),
        }

        match self
            .feed_cache
            .purge_older_than(self.settings.retention_days)
            .await
        {
            Ok(n) => report.purged = n,
            Err(e) => tracing::error!(error = %e, "Feed purge failed"),
        }

        match self.feed_cache.statistics().await {
            Ok(stats) => tracing::info!(
                total = stats.total,
                valid = stats.valid,
                expired = stats.expired,
                "Feed cache statistics"
            ),
            Err(e) => tracing::warn!(error = %e, "Feed statistics unavailable"),
        }

        tracing::info!(
            decayed = report.decayed,
            cleaned = report.cleaned,
            refreshed = report.refreshed,
            refresh_failures = report.refresh_failures,
            purged = report.purged,
            "Maintenance cycle finished"
        );
        report
    }

    /// Users whose feed should be recomputed this cycle, in priority order
    ///
    /// Expiring then expired feeds of active users come first, then active
    /// or engaged users with no feed at all.
    pub async fn refresh_targets(&self) -> AppResult<Vec<String>> {
        let store = self.interests.store();
        let since = store.now() - self.settings.activity_window;

        let active: HashSet<String> = store.active_users(since).await?.into_iter().collect();
        let engaged = match self.catalog.engaged_user_ids().await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(error = %e, "Engaged users unavailable, using active users only");
                Vec::new()
            }
        };

        let expiring = self.feed_cache.expiring(self.settings.expiring_within).await?;
        let expired = self.feed_cache.expired().await?;

        let mut candidates: Vec<String> = active.iter().cloned().collect();
        candidates.sort();
        candidates.extend(engaged.into_iter().filter(|u| !active.contains(u)));
        let missing = self.feed_cache.users_missing_feed(&candidates).await?;

        let mut seen = HashSet::new();
        let targets: Vec<String> = expiring
            .into_iter()
            .chain(expired)
            .map(|entry| entry.user_id)
            .filter(|user| active.contains(user))
            .chain(missing)
            .filter(|user| seen.insert(user.clone()))
            .take(self.settings.max_refresh_per_cycle)
            .collect();

        Ok(targets)
    }

    /// Refreshes in chunks of `refresh_concurrency` parallel tasks
    async fn refresh_all(&self, targets: Vec<String>) -> (u64, u64) {
        let mut refreshed = 0;
        let mut failures = 0;

        for chunk in targets.chunks(self.settings.refresh_concurrency.max(1)) {
            let mut tasks = JoinSet::new();
            for user_id in chunk {
                let feeds = Arc::clone(&self.feeds);
                let user_id = user_id.clone();
                tasks.spawn(async move {
                    let result = feeds.refresh_feed(&user_id).await;
                    (user_id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(_))) => refreshed += 1,
                    Ok((user_id, Err(e))) => {
                        failures += 1;
                        tracing::warn!(user_id = %user_id, error = %e, "Feed refresh failed");
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::error!(error = %e, "Feed refresh task panicked");
                    }
                }
            }
        }

        (refreshed, failures)
    }
}
