use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Ranking;

/// Cached recommendation result for one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEntry {
    pub user_id: String,
    /// Most relevant first
    pub post_ids: Vec<Uuid>,
    /// Index-aligned with `post_ids`
    pub author_ids: Vec<String>,
    /// Index-aligned with `post_ids`
    pub scores: Vec<f64>,
    pub algorithm_version: String,
    /// Length the ranking was asked for
    pub requested_size: usize,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FeedEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// An entry with mismatched sequences cannot be trusted for any position
    pub fn is_consistent(&self) -> bool {
        self.post_ids.len() == self.scores.len() && self.post_ids.len() == self.author_ids.len()
    }

    /// The catalog ran out before `requested_size`, so the entry holds every
    /// eligible post and satisfies any count
    pub fn is_exhausted(&self) -> bool {
        self.post_ids.len() < self.requested_size
    }

    pub fn top(&self, count: usize) -> Vec<Uuid> {
        self.post_ids.iter().take(count).copied().collect()
    }

    /// First `count` posts not written by `exclude_author_id`
    pub fn top_excluding(&self, count: usize, exclude_author_id: Option<&str>) -> Vec<Uuid> {
        let Some(author) = exclude_author_id else {
            return self.top(count);
        };
        self.post_ids
            .iter()
            .zip(&self.author_ids)
            .filter(|(_, a)| a.as_str() != author)
            .map(|(id, _)| *id)
            .take(count)
            .collect()
    }
}

/// Ranked content handed to [`FeedCache::upsert`](crate::db::FeedCache::upsert)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedContent {
    pub post_ids: Vec<Uuid>,
    pub author_ids: Vec<String>,
    pub scores: Vec<f64>,
    pub algorithm_version: String,
    pub requested_size: usize,
}

impl FeedContent {
    pub fn from_ranking(ranking: &Ranking, algorithm_version: String, requested_size: usize) -> Self {
        Self {
            post_ids: ranking.post_ids(),
            author_ids: ranking.author_ids(),
            scores: ranking.scores(),
            algorithm_version,
            requested_size,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedStatistics {
    pub total: u64,
    pub valid: u64,
    pub expired: u64,
}
