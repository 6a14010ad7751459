use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blog_recommender::{
    api::{create_router, AppState},
    clock::{Clock, SystemClock},
    config::Config,
    db::{
        create_pool, create_redis_client, run_migrations, Cache, CachedInterestStore, FeedCache,
        InterestStore, PgFeedCache, PgInterestStore,
    },
    services::catalog::{ContentCatalog, PgContentCatalog},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let pool = create_pool(&config.database_url, config.max_db_connections).await?;
    run_migrations(&pool).await?;

    let pg_interests: Arc<dyn InterestStore> = Arc::new(PgInterestStore::new(
        pool.clone(),
        config.interest_settings().decay_policy(),
        Arc::clone(&clock),
    ));

    let (interest_store, cache_writer) = match &config.redis_url {
        Some(url) => {
            let client = create_redis_client(url)?;
            let (cache, handle) = Cache::new(client).await;
            tracing::info!("Interest read cache enabled");
            let store: Arc<dyn InterestStore> = Arc::new(CachedInterestStore::new(
                pg_interests,
                cache,
                config.interest_cache_ttl_secs,
            ));
            (store, Some(handle))
        }
        None => (pg_interests, None),
    };

    let feed_cache: Arc<dyn FeedCache> = Arc::new(PgFeedCache::new(
        pool.clone(),
        config.feed_validity(),
        Arc::clone(&clock),
    ));
    let catalog: Arc<dyn ContentCatalog> = Arc::new(PgContentCatalog::new(pool));

    let state = AppState::new(interest_store, feed_cache, catalog, &config);
    let maintenance = state
        .maintenance_scheduler(config.maintenance_settings())
        .spawn();

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.shutdown().await;
    if let Some(handle) = cache_writer {
        handle.shutdown().await;
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
