use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    clock::Clock,
    db::InterestStore,
    error::AppResult,
    models::{InterestRecord, InterestStatistics},
    services::decay::DecayPolicy,
};

/// Rows locked and rewritten per decay sweep transaction
const SWEEP_BATCH_SIZE: i64 = 1_000;

#[derive(sqlx::FromRow)]
struct InterestRow {
    user_id: String,
    tag: String,
    score: f64,
    interaction_count: i32,
    last_updated: DateTime<Utc>,
    last_interaction: DateTime<Utc>,
}

impl From<InterestRow> for InterestRecord {
    fn from(row: InterestRow) -> Self {
        Self {
            user_id: row.user_id,
            tag: row.tag,
            score: row.score,
            interaction_count: row.interaction_count,
            last_updated: row.last_updated,
            last_interaction: row.last_interaction,
        }
    }
}

/// Interest store backed by the `user_interests` table
///
/// Read-modify-write happens inside one transaction holding row locks, so
/// concurrent increments for the same (user, tag) serialize instead of
/// overwriting each other.
pub struct PgInterestStore {
    pool: PgPool,
    policy: DecayPolicy,
    clock: Arc<dyn Clock>,
}

impl PgInterestStore {
    pub fn new(pool: PgPool, policy: DecayPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy,
            clock,
        }
    }

    async fn upsert_tags(
        &self,
        user_id: &str,
        increments: &HashMap<String, f64>,
    ) -> AppResult<Vec<InterestRecord>> {
        let now = self.clock.now();

        // sorted so concurrent writers take row locks in the same order
        let mut tags: Vec<String> = increments.keys().cloned().collect();
        tags.sort();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_interests
                (user_id, tag, score, interaction_count, last_updated, last_interaction)
            SELECT $1, tag, 0, 0, $3, $3
            FROM UNNEST($2::text[]) AS t(tag)
            ON CONFLICT (user_id, tag) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(&tags)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let rows: Vec<InterestRow> = sqlx::query_as(
            r#"
            SELECT user_id, tag, score, interaction_count, last_updated, last_interaction
            FROM user_interests
            WHERE user_id = $1 AND tag = ANY($2)
            ORDER BY tag
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(&tags)
        .fetch_all(&mut *tx)
        .await?;

        // a placeholder row (count 0, score 0) accumulates to a fresh record
        let updated: Vec<InterestRecord> = rows
            .into_iter()
            .map(InterestRecord::from)
            .map(|existing| {
                let increment = increments.get(&existing.tag).copied().unwrap_or_default();
                self.policy
                    .accumulate(Some(&existing), user_id, &existing.tag, increment, now)
            })
            .collect();

        let tags: Vec<String> = updated.iter().map(|r| r.tag.clone()).collect();
        let scores: Vec<f64> = updated.iter().map(|r| r.score).collect();
        let counts: Vec<i32> = updated.iter().map(|r| r.interaction_count).collect();

        sqlx::query(
            r#"
            UPDATE user_interests AS ui
            SET score = u.score,
                interaction_count = u.interaction_count,
                last_updated = $5,
                last_interaction = $5
            FROM UNNEST($2::text[], $3::float8[], $4::int4[]) AS u(tag, score, interaction_count)
            WHERE ui.user_id = $1 AND ui.tag = u.tag
            "#,
        )
        .bind(user_id)
        .bind(&tags)
        .bind(&scores)
        .bind(&counts)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl InterestStore for PgInterestStore {
    async fn get(&self, user_id: &str, tag: &str) -> AppResult<Option<InterestRecord>> {
        let now = self.clock.now();
        let row: Option<InterestRow> = sqlx::query_as(
            r#"
            SELECT user_id, tag, score, interaction_count, last_updated, last_interaction
            FROM user_interests
            WHERE user_id = $1 AND tag = $2
            "#,
        )
        .bind(user_id)
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| self.policy.decayed(&r.into(), now)))
    }

    async fn upsert(&self, user_id: &str, tag: &str, increment: f64) -> AppResult<InterestRecord> {
        let increments = HashMap::from([(tag.to_string(), increment)]);
        let mut updated = self.upsert_tags(user_id, &increments).await?;
        updated.pop().ok_or_else(|| {
            crate::error::AppError::Internal(format!(
                "Upsert of interest {}/{} returned no row",
                user_id, tag
            ))
        })
    }

    async fn batch_upsert(&self, user_id: &str, increments: &HashMap<String, f64>) -> AppResult<()> {
        if increments.is_empty() {
            return Ok(());
        }
        self.upsert_tags(user_id, increments).await?;
        Ok(())
    }

    async fn user_records(&self, user_id: &str) -> AppResult<Vec<InterestRecord>> {
        let rows: Vec<InterestRow> = sqlx::query_as(
            r#"
            SELECT user_id, tag, score, interaction_count, last_updated, last_interaction
            FROM user_interests
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(InterestRecord::from).collect())
    }

    async fn decay_sweep(&self, factor: f64, older_than: DateTime<Utc>) -> AppResult<u64> {
        let now = self.clock.now();
        // swept rows are stamped with now and must not be selected again
        let older_than = older_than.min(now);
        let mut touched = 0u64;

        loop {
            let mut tx = self.pool.begin().await?;

            let rows: Vec<InterestRow> = sqlx::query_as(
                r#"
                SELECT user_id, tag, score, interaction_count, last_updated, last_interaction
                FROM user_interests
                WHERE last_updated < $1
                ORDER BY user_id, tag
                LIMIT $2
                FOR UPDATE SKIP LOCKED
                "#,
            )
            .bind(older_than)
            .bind(SWEEP_BATCH_SIZE)
            .fetch_all(&mut *tx)
            .await?;

            if rows.is_empty() {
                tx.commit().await?;
                break;
            }

            let swept: Vec<InterestRecord> = rows
                .into_iter()
                .map(|row| self.policy.swept(&row.into(), factor, now))
                .collect();

            let users: Vec<String> = swept.iter().map(|r| r.user_id.clone()).collect();
            let tags: Vec<String> = swept.iter().map(|r| r.tag.clone()).collect();
            let scores: Vec<f64> = swept.iter().map(|r| r.score).collect();

            sqlx::query(
                r#"
                UPDATE user_interests AS ui
                SET score = u.score, last_updated = $4
                FROM UNNEST($1::text[], $2::text[], $3::float8[]) AS u(user_id, tag, score)
                WHERE ui.user_id = u.user_id AND ui.tag = u.tag
                "#,
            )
            .bind(&users)
            .bind(&tags)
            .bind(&scores)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            touched += swept.len() as u64;
            tracing::debug!(batch = swept.len(), total = touched, "Decay sweep batch committed");
        }

        Ok(touched)
    }

    async fn cleanup_below(&self, min_score: f64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM user_interests WHERE score < $1")
            .bind(min_score)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn active_users(&self, since: DateTime<Utc>) -> AppResult<Vec<String>> {
        let users: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id
            FROM user_interests
            WHERE last_interaction >= $1
            ORDER BY user_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(users.into_iter().map(|(id,)| id).collect())
    }

    async fn statistics(&self) -> AppResult<InterestStatistics> {
        let (records, users, tags, average): (i64, i64, i64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(DISTINCT user_id),
                   COUNT(DISTINCT tag),
                   COALESCE(AVG(score), 0)::float8
            FROM user_interests
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(InterestStatistics {
            record_count: records as u64,
            user_count: users as u64,
            tag_count: tags as u64,
            average_score: average,
        })
    }

    fn decay_policy(&self) -> DecayPolicy {
        self.policy
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
