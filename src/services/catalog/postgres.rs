use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{CandidateFilter, CandidatePost},
};

use super::ContentCatalog;

/// Upper bound on candidates fetched per ranking run
const DEFAULT_MAX_CANDIDATES: i64 = 1_000;

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    author_id: String,
    tags: Vec<String>,
    view_count: i64,
    avg_rating: f64,
    rating_count: i64,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl From<CandidateRow> for CandidatePost {
    fn from(row: CandidateRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            tags: row.tags,
            view_count: row.view_count,
            avg_rating: row.avg_rating,
            rating_count: row.rating_count,
            created_at: row.created_at,
            published_at: row.published_at,
        }
    }
}

/// Catalog over the blog service's `blog_posts`, `post_ratings` and
/// `saved_blogs` tables
///
/// Those tables belong to the blog service and are not migrated here.
pub struct PgContentCatalog {
    pool: PgPool,
    max_candidates: i64,
}

impl PgContentCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_max_candidates(mut self, max_candidates: i64) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

fn catalog_error(e: sqlx::Error) -> AppError {
    AppError::Catalog(e.to_string())
}

#[async_trait::async_trait]
impl ContentCatalog for PgContentCatalog {
    async fn list_published_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> AppResult<Vec<CandidatePost>> {
        let excluded: Vec<Uuid> = filter.exclude_post_ids.iter().copied().collect();

        let rows: Vec<CandidateRow> = sqlx::query_as(
            r#"
            SELECT p.id,
                   p.author_id,
                   COALESCE(p.tags, '{}') AS tags,
                   p.view_count::int8 AS view_count,
                   COALESCE(r.avg_rating, 0)::float8 AS avg_rating,
                   COALESCE(r.rating_count, 0)::int8 AS rating_count,
                   p.created_at,
                   p.published_at
            FROM blog_posts p
            LEFT JOIN (
                SELECT blog_post_id, AVG(rating) AS avg_rating, COUNT(*) AS rating_count
                FROM post_ratings
                GROUP BY blog_post_id
            ) r ON r.blog_post_id = p.id
            WHERE p.status = 'published'
              AND ($1::text IS NULL OR p.author_id <> $1)
              AND NOT (p.id = ANY($2::uuid[]))
            ORDER BY p.created_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.exclude_author_id.as_deref())
        .bind(&excluded)
        .bind(self.max_candidates)
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_error)?;

        Ok(rows.into_iter().map(CandidatePost::from).collect())
    }

    async fn total_published_count(&self) -> AppResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM blog_posts WHERE status = 'published'")
                .fetch_one(&self.pool)
                .await
                .map_err(catalog_error)?;
        Ok(count.max(0) as u64)
    }

    async fn engaged_user_ids(&self) -> AppResult<Vec<String>> {
        let users: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM saved_blogs
            UNION
            SELECT user_id FROM post_ratings
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(catalog_error)?;

        Ok(users.into_iter().map(|(id,)| id).collect())
    }
}
