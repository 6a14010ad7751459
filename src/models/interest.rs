use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user's affinity for one tag, as stored
///
/// `score` is the value at `last_updated`; readers must decay it before
/// reporting it. `last_interaction` only moves on real interactions, while
/// `last_updated` also moves when a decay sweep rewrites the score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterestRecord {
    pub user_id: String,
    pub tag: String,
    pub score: f64,
    pub interaction_count: i32,
    pub last_updated: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
}

impl InterestRecord {
    pub fn new(user_id: &str, tag: &str, score: f64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            tag: tag.to_string(),
            score,
            interaction_count: 1,
            last_updated: now,
            last_interaction: now,
        }
    }
}

/// A tag with its decayed score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagScore {
    pub tag: String,
    pub score: f64,
}

/// Aggregate view over the whole interest store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InterestStatistics {
    pub record_count: u64,
    pub user_count: u64,
    pub tag_count: u64,
    /// Mean stored (undecayed) score
    pub average_score: f64,
}
