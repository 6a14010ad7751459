use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Display};
use uuid::Uuid;

/// Ranking strategy selected by data sufficiency
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Personalized,
    Trending,
    Popularity,
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tier::Personalized => "personalized",
            Tier::Trending => "trending",
            Tier::Popularity => "popularity",
        };
        write!(f, "{}", name)
    }
}

/// A ranked post with the score and tier that placed it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredPost {
    pub post_id: Uuid,
    pub author_id: String,
    pub score: f64,
    pub tier: Tier,
}

/// Output of one engine run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ranking {
    /// Tier that produced the head of the list
    pub tier: Tier,
    pub posts: Vec<ScoredPost>,
}

impl Ranking {
    pub fn empty(tier: Tier) -> Self {
        Self {
            tier,
            posts: Vec::new(),
        }
    }

    pub fn post_ids(&self) -> Vec<Uuid> {
        self.posts.iter().map(|p| p.post_id).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.posts.iter().map(|p| p.score).collect()
    }

    pub fn author_ids(&self) -> Vec<String> {
        self.posts.iter().map(|p| p.author_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub user_id: String,
    pub count: usize,
    pub exclude_author_id: Option<String>,
    pub exclude_post_ids: HashSet<Uuid>,
}

impl RecommendationRequest {
    pub fn new(user_id: impl Into<String>, count: usize) -> Self {
        Self {
            user_id: user_id.into(),
            count,
            exclude_author_id: None,
            exclude_post_ids: HashSet::new(),
        }
    }

    pub fn excluding_author(mut self, author_id: impl Into<String>) -> Self {
        self.exclude_author_id = Some(author_id.into());
        self
    }

    pub fn excluding_posts(mut self, post_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.exclude_post_ids.extend(post_ids);
        self
    }
}
