//! Per-tier scoring functions
//!
//! Everything here is pure: the caller supplies the candidates, the
//! interest profile and the instant to score against.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{CandidatePost, ScoredPost, Tier};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Views at which the normalized view signal saturates
const VIEW_SATURATION: f64 = 1_000.0;
/// Rating count at which the engagement signal saturates
const RATING_COUNT_SATURATION: f64 = 20.0;
const MAX_RATING: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TrendingWeights {
    pub views: f64,
    pub rating: f64,
    pub engagement: f64,
    pub recency: f64,
}

impl Default for TrendingWeights {
    fn default() -> Self {
        Self {
            views: 0.3,
            rating: 0.3,
            engagement: 0.2,
            recency: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringParams {
    pub recency_half_life_days: f64,
    /// Weight of the recency boost added to personalized affinity
    pub personalized_recency_boost: f64,
    /// Weight of the engagement prior added to personalized affinity
    pub personalized_engagement_boost: f64,
    pub trending: TrendingWeights,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            recency_half_life_days: 7.0,
            personalized_recency_boost: 0.1,
            personalized_engagement_boost: 0.1,
            trending: TrendingWeights::default(),
        }
    }
}

/// Half-life recency in (0, 1]; posts dated in the future score 1.0
pub fn recency_score(published_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = (now - published_at).num_milliseconds() as f64 / MILLIS_PER_DAY;
    if age_days <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_days / half_life_days).clamp(0.0, 1.0)
}

/// Log-scaled views in [0, 1], saturating at 1000 views
pub fn normalized_views(view_count: i64) -> f64 {
    let views = view_count.max(1) as f64;
    ((views + 1.0).log10() / (VIEW_SATURATION + 1.0).log10()).clamp(0.0, 1.0)
}

pub fn normalized_rating(avg_rating: f64) -> f64 {
    if !avg_rating.is_finite() {
        return 0.0;
    }
    (avg_rating / MAX_RATING).clamp(0.0, 1.0)
}

pub fn normalized_rating_count(rating_count: i64) -> f64 {
    (rating_count.max(0) as f64 / RATING_COUNT_SATURATION).min(1.0)
}

/// Quality prior independent of the viewer
pub fn engagement_prior(post: &CandidatePost) -> f64 {
    (normalized_views(post.view_count) + normalized_rating(post.avg_rating)) / 2.0
}

pub fn popularity_score(post: &CandidatePost) -> f64 {
    (post.view_count.max(0) + post.rating_count.max(0)) as f64
}

pub fn trending_score(post: &CandidatePost, now: DateTime<Utc>, params: &ScoringParams) -> f64 {
    let w = &params.trending;
    w.views * normalized_views(post.view_count)
        + w.rating * normalized_rating(post.avg_rating)
        + w.engagement * normalized_rating_count(post.rating_count)
        + w.recency
            * recency_score(
                post.effective_published_at(),
                now,
                params.recency_half_life_days,
            )
}

/// Sum of the viewer's interest over the post's distinct tags
pub fn affinity(post: &CandidatePost, interests: &HashMap<String, f64>) -> f64 {
    let mut seen = HashSet::new();
    post.tags
        .iter()
        .filter(|tag| seen.insert(tag.as_str()))
        .filter_map(|tag| interests.get(tag))
        .sum()
}

/// `None` when the post shares no interest with the viewer
pub fn personalized_score(
    post: &CandidatePost,
    interests: &HashMap<String, f64>,
    now: DateTime<Utc>,
    params: &ScoringParams,
) -> Option<f64> {
    let affinity = affinity(post, interests);
    if affinity <= 0.0 {
        return None;
    }

    let recency = recency_score(
        post.effective_published_at(),
        now,
        params.recency_half_life_days,
    );
    Some(
        affinity
            + params.personalized_recency_boost * recency
            + params.personalized_engagement_boost * engagement_prior(post),
    )
}

/// Scores `candidates`, keeps the best `count` and tags them with `tier`
///
/// Order is score descending, then newer `created_at`, then post id, so
/// equal scores always produce the same list.
pub fn rank<F>(candidates: &[CandidatePost], count: usize, tier: Tier, score: F) -> Vec<ScoredPost>
where
    F: Fn(&CandidatePost) -> Option<f64>,
{
    let mut scored: Vec<(&CandidatePost, f64)> = candidates
        .iter()
        .filter_map(|post| score(post).map(|s| (post, s)))
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    scored
        .into_iter()
        .take(count)
        .map(|(post, score)| ScoredPost {
            post_id: post.id,
            author_id: post.author_id.clone(),
            score,
            tier,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn post(tags: &[&str], views: i64, created_at: DateTime<Utc>) -> CandidatePost {
        CandidatePost {
            id: Uuid::new_v4(),
            author_id: "author".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            view_count: views,
            avg_rating: 0.0,
            rating_count: 0,
            created_at,
            published_at: None,
        }
    }

    #[test]
    fn test_recency_halves_each_half_life() {
        let now = Utc::now();
        let week_old = recency_score(now - Duration::days(7), now, 7.0);
        let two_weeks_old = recency_score(now - Duration::days(14), now, 7.0);
        assert!((week_old - 0.5).abs() < 1e-9);
        assert!((two_weeks_old - 0.25).abs() < 1e-9);
        assert_eq!(recency_score(now + Duration::days(1), now, 7.0), 1.0);
    }

    #[test]
    fn test_view_normalization_saturates() {
        assert!(normalized_views(0) > 0.0);
        assert_eq!(normalized_views(0), normalized_views(1));
        assert!((normalized_views(1_000) - 1.0).abs() < 1e-9);
        assert_eq!(normalized_views(1_000_000), 1.0);
        assert!(normalized_views(10) < normalized_views(100));
    }

    #[test]
    fn test_rating_signals_are_bounded() {
        assert_eq!(normalized_rating(5.0), 1.0);
        assert_eq!(normalized_rating(f64::NAN), 0.0);
        assert_eq!(normalized_rating_count(40), 1.0);
        assert!((normalized_rating_count(5) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_affinity_counts_each_tag_once() {
        let now = Utc::now();
        let interests = HashMap::from([("rust".to_string(), 2.0), ("go".to_string(), 1.0)]);
        let p = post(&["rust", "rust", "go", "cooking"], 0, now);
        assert!((affinity(&p, &interests) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_personalized_requires_overlap() {
        let now = Utc::now();
        let interests = HashMap::from([("rust".to_string(), 2.0)]);
        let params = ScoringParams::default();

        assert!(personalized_score(&post(&["cooking"], 0, now), &interests, now, &params).is_none());

        let score = personalized_score(&post(&["rust"], 0, now), &interests, now, &params).unwrap();
        // affinity + full recency boost + engagement prior of an unviewed post
        let prior = normalized_views(0) / 2.0;
        assert!((score - (2.0 + 0.1 + 0.1 * prior)).abs() < 1e-9);
    }

    #[test]
    fn test_trending_prefers_fresh_engaged_posts() {
        let now = Utc::now();
        let params = ScoringParams::default();
        let stale = post(&[], 10, now - Duration::days(60));
        let mut fresh = post(&[], 500, now);
        fresh.avg_rating = 4.5;
        fresh.rating_count = 12;

        assert!(trending_score(&fresh, now, &params) > trending_score(&stale, now, &params));
        assert!(trending_score(&fresh, now, &params) <= 1.0);
    }

    #[test]
    fn test_rank_breaks_ties_by_recency_then_id() {
        let now = Utc::now();
        let older = post(&[], 0, now - Duration::hours(1));
        let newer = post(&[], 0, now);
        let mut twin = post(&[], 0, now);
        twin.id = Uuid::nil();

        let ranked = rank(
            &[older.clone(), newer.clone(), twin.clone()],
            10,
            Tier::Popularity,
            |_| Some(1.0),
        );

        let ids: Vec<Uuid> = ranked.iter().map(|p| p.post_id).collect();
        let (first, second) = if twin.id < newer.id {
            (twin.id, newer.id)
        } else {
            (newer.id, twin.id)
        };
        assert_eq!(ids, vec![first, second, older.id]);
    }

    #[test]
    fn test_rank_drops_unscored_and_truncates() {
        let now = Utc::now();
        let posts: Vec<CandidatePost> = (0..5).map(|i| post(&[], i, now)).collect();
        let ranked = rank(&posts, 2, Tier::Popularity, |p| {
            (p.view_count % 2 == 0).then(|| popularity_score(p))
        });
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, 4.0);
        assert_eq!(ranked[1].score, 2.0);
    }
}
