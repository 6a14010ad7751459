use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::{
    error::AppResult,
    models::{CandidateFilter, CandidatePost},
};

use super::ContentCatalog;

/// Catalog held in memory, for local runs and tests
#[derive(Default)]
pub struct InMemoryCatalog {
    posts: RwLock<Vec<CandidatePost>>,
    engaged: RwLock<BTreeSet<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(posts: Vec<CandidatePost>) -> Self {
        Self {
            posts: RwLock::new(posts),
            engaged: RwLock::default(),
        }
    }

    pub fn insert(&self, post: CandidatePost) {
        self.posts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(post);
    }

    pub fn mark_engaged(&self, user_id: impl Into<String>) {
        self.engaged
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.into());
    }
}

#[async_trait::async_trait]
impl ContentCatalog for InMemoryCatalog {
    async fn list_published_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> AppResult<Vec<CandidatePost>> {
        let posts = self.posts.read().unwrap_or_else(|e| e.into_inner());
        Ok(posts.iter().filter(|p| filter.admits(p)).cloned().collect())
    }

    async fn total_published_count(&self) -> AppResult<u64> {
        Ok(self.posts.read().unwrap_or_else(|e| e.into_inner()).len() as u64)
    }

    async fn engaged_user_ids(&self) -> AppResult<Vec<String>> {
        Ok(self
            .engaged
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect())
    }
}
