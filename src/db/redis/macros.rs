/// Read-through caching over a [`Cache`](crate::db::redis::Cache).
///
/// Returns the cached value when present. Otherwise awaits `$block`,
/// queues the result for a background write with `$ttl` seconds to live,
/// and returns it. A failed cache read is logged and treated as a miss, so
/// an unavailable Redis only costs latency.
///
/// Evaluates to an `AppResult`; errors from `$block` propagate with `?`.
///
/// # Example
/// ```rust,ignore
/// let records: AppResult<Vec<InterestRecord>> = cached!(
///     cache,
///     CacheKey::UserInterests { user_id: user_id.to_string(), epoch, generation },
///     60,
///     store.user_records(user_id)
/// );
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        let hit = match $cache.get_from_cache(&key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                None
            }
        };

        match hit {
            Some(cached) => Ok(cached),
            None => {
                let value = $block.await?;
                $cache.set_in_background(&key, &value, $ttl);
                Ok(value)
            }
        }
    }};
}
