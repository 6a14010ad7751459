mod feed;
mod interaction;
mod interest;
mod post;
mod recommendation;

pub use feed::{FeedContent, FeedEntry, FeedStatistics};
pub use interaction::{InteractionEvent, InteractionType};
pub use interest::{InterestRecord, InterestStatistics, TagScore};
pub use post::{CandidateFilter, CandidatePost};
pub use recommendation::{RecommendationRequest, Ranking, ScoredPost, Tier};
