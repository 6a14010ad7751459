use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::request_id::RequestId,
    models::{FeedStatistics, InteractionEvent, InterestStatistics, TagScore},
};

use super::AppState;

const DEFAULT_RECOMMENDATION_COUNT: usize = 10;
const MAX_RECOMMENDATION_COUNT: usize = 200;
const DEFAULT_INTEREST_LIMIT: usize = 20;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub count: Option<usize>,
    pub exclude_author_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub user_id: String,
    pub post_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub user_id: String,
    pub post_count: usize,
    pub algorithm_version: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct InterestQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct InterestResponse {
    pub user_id: String,
    pub interests: Vec<TagScore>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarityQuery {
    pub user_a: String,
    pub user_b: String,
}

#[derive(Debug, Serialize)]
pub struct SimilarityResponse {
    pub user_a: String,
    pub user_b: String,
    pub similarity: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub interests: InterestStatistics,
    pub feeds: FeedStatistics,
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Records one interaction; the feed is not recomputed
pub async fn record_interaction(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(event): Json<InteractionEvent>,
) -> AppResult<StatusCode> {
    if event.user_id.trim().is_empty() {
        return Err(AppError::InvalidInput("user_id must not be empty".to_string()));
    }

    tracing::debug!(request_id = %request_id, user_id = %event.user_id, "Recording interaction");
    state.interests.record_interaction(&event).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn get_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<RecommendationQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let count = params.count.unwrap_or(DEFAULT_RECOMMENDATION_COUNT);
    if count > MAX_RECOMMENDATION_COUNT {
        return Err(AppError::InvalidInput(format!(
            "count must be at most {}",
            MAX_RECOMMENDATION_COUNT
        )));
    }

    let post_ids = state
        .feeds
        .get_recommendations(&user_id, count, params.exclude_author_id.as_deref())
        .await;

    Ok(Json(RecommendationResponse { user_id, post_ids }))
}

/// Forces recomputation of the user's cached feed
pub async fn refresh_feed(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<RefreshResponse>> {
    let entry = state.feeds.refresh_feed(&user_id).await?;
    Ok(Json(RefreshResponse {
        user_id,
        post_count: entry.post_ids.len(),
        algorithm_version: entry.algorithm_version,
        expires_at: entry.expires_at,
    }))
}

pub async fn get_interests(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<InterestQuery>,
) -> AppResult<Json<InterestResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_INTEREST_LIMIT);
    let interests = state.interests.get_top_interests(&user_id, limit).await?;
    Ok(Json(InterestResponse { user_id, interests }))
}

pub async fn get_similarity(
    State(state): State<AppState>,
    Query(params): Query<SimilarityQuery>,
) -> AppResult<Json<SimilarityResponse>> {
    let similarity = state
        .interests
        .get_user_similarity(&params.user_a, &params.user_b)
        .await?;
    Ok(Json(SimilarityResponse {
        user_a: params.user_a,
        user_b: params.user_b,
        similarity,
    }))
}

pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    let (interests, feeds) = tokio::try_join!(
        state.interests.interest_statistics(),
        state.feed_cache.statistics()
    )?;
    Ok(Json(StatsResponse { interests, feeds }))
}
