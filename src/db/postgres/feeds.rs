use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{new_feed_entry, FeedCache},
    error::AppResult,
    models::{FeedContent, FeedEntry, FeedStatistics},
};

#[derive(sqlx::FromRow)]
struct FeedRow {
    user_id: String,
    post_ids: Vec<Uuid>,
    author_ids: Vec<String>,
    scores: Vec<f64>,
    algorithm_version: String,
    requested_size: i32,
    computed_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<FeedRow> for FeedEntry {
    fn from(row: FeedRow) -> Self {
        Self {
            user_id: row.user_id,
            post_ids: row.post_ids,
            author_ids: row.author_ids,
            scores: row.scores,
            algorithm_version: row.algorithm_version,
            requested_size: row.requested_size.max(0) as usize,
            computed_at: row.computed_at,
            expires_at: row.expires_at,
        }
    }
}

/// Feed cache backed by the `personalized_feeds` table
pub struct PgFeedCache {
    pool: PgPool,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl PgFeedCache {
    pub fn new(pool: PgPool, validity: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            validity,
            clock,
        }
    }
}

#[async_trait::async_trait]
impl FeedCache for PgFeedCache {
    async fn get(&self, user_id: &str) -> AppResult<Option<FeedEntry>> {
        let row: Option<FeedRow> = sqlx::query_as(
            r#"
            SELECT user_id, post_ids, author_ids, scores, algorithm_version, requested_size,
                   computed_at, expires_at
            FROM personalized_feeds
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedEntry::from))
    }

    async fn upsert(&self, user_id: &str, content: FeedContent) -> AppResult<FeedEntry> {
        let entry = new_feed_entry(user_id, content, self.clock.now(), self.validity)?;
        let requested_size = i32::try_from(entry.requested_size).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            INSERT INTO personalized_feeds
                (user_id, post_ids, author_ids, scores, algorithm_version, requested_size,
                 computed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE
            SET post_ids = EXCLUDED.post_ids,
                author_ids = EXCLUDED.author_ids,
                scores = EXCLUDED.scores,
                algorithm_version = EXCLUDED.algorithm_version,
                requested_size = EXCLUDED.requested_size,
                computed_at = EXCLUDED.computed_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&entry.user_id)
        .bind(&entry.post_ids)
        .bind(&entry.author_ids)
        .bind(&entry.scores)
        .bind(&entry.algorithm_version)
        .bind(requested_size)
        .bind(entry.computed_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn expiring(&self, within: Duration) -> AppResult<Vec<FeedEntry>> {
        let now = self.clock.now();
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT user_id, post_ids, author_ids, scores, algorithm_version, requested_size,
                   computed_at, expires_at
            FROM personalized_feeds
            WHERE expires_at > $1 AND expires_at <= $2
            ORDER BY expires_at
            "#,
        )
        .bind(now)
        .bind(now + within)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedEntry::from).collect())
    }

    async fn expired(&self) -> AppResult<Vec<FeedEntry>> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            r#"
            SELECT user_id, post_ids, author_ids, scores, algorithm_version, requested_size,
                   computed_at, expires_at
            FROM personalized_feeds
            WHERE expires_at <= $1
            ORDER BY expires_at
            "#,
        )
        .bind(self.clock.now())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedEntry::from).collect())
    }

    async fn purge_older_than(&self, days: i64) -> AppResult<u64> {
        let cutoff = self.clock.now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM personalized_feeds WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn users_missing_feed(&self, active_user_ids: &[String]) -> AppResult<Vec<String>> {
        if active_user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let users: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT u.user_id
            FROM UNNEST($1::text[]) WITH ORDINALITY AS u(user_id, position)
            WHERE NOT EXISTS (
                SELECT 1 FROM personalized_feeds f WHERE f.user_id = u.user_id
            )
            GROUP BY u.user_id
            ORDER BY MIN(u.position)
            "#,
        )
        .bind(active_user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(users.into_iter().map(|(id,)| id).collect())
    }

    async fn remove(&self, user_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM personalized_feeds WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn statistics(&self) -> AppResult<FeedStatistics> {
        let (total, valid, expired): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE expires_at > $1),
                   COUNT(*) FILTER (WHERE expires_at <= $1)
            FROM personalized_feeds
            "#,
        )
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await?;

        Ok(FeedStatistics {
            total: total as u64,
            valid: valid as u64,
            expired: expired as u64,
        })
    }

    fn validity_window(&self) -> Duration {
        self.validity
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
