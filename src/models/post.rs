use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A published post eligible for recommendation, as the catalog reports it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidatePost {
    pub id: Uuid,
    pub author_id: String,
    pub tags: Vec<String>,
    pub view_count: i64,
    pub avg_rating: f64,
    pub rating_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl CandidatePost {
    /// Publish time when known, otherwise creation time
    pub fn effective_published_at(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }
}

/// Exclusions applied when listing candidates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFilter {
    pub exclude_author_id: Option<String>,
    pub exclude_post_ids: HashSet<Uuid>,
}

impl CandidateFilter {
    pub fn admits(&self, post: &CandidatePost) -> bool {
        if self.exclude_author_id.as_deref() == Some(post.author_id.as_str()) {
            return false;
        }
        !self.exclude_post_ids.contains(&post.id)
    }
}
