//! Interest decay arithmetic
//!
//! Both the read-time (lazy) decay and the maintenance sweep go through
//! [`apply_decay`], so the two paths cannot drift apart.

use chrono::{DateTime, Utc};

use crate::models::{InterestRecord, TagScore};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Decays `score` for the time elapsed between `last_updated` and `now`
///
/// Elapsed time is clamped at zero, so a `last_updated` in the future
/// (clock skew) leaves the score unchanged instead of amplifying it.
pub fn apply_decay(
    score: f64,
    last_updated: DateTime<Utc>,
    now: DateTime<Utc>,
    daily_rate: f64,
) -> f64 {
    let days = elapsed_days(last_updated, now);
    if days == 0.0 {
        return score;
    }
    score * daily_rate.powf(days)
}

fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0)
}

/// Decay parameters shared by every interest store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPolicy {
    pub daily_rate: f64,
    /// Decayed scores below this are not reported
    pub min_score: f64,
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            daily_rate: 0.98,
            min_score: 0.01,
        }
    }
}

impl DecayPolicy {
    pub fn decayed_score(&self, record: &InterestRecord, now: DateTime<Utc>) -> f64 {
        apply_decay(record.score, record.last_updated, now, self.daily_rate)
    }

    /// Copy of `record` with its score decayed to `now`; `last_updated` is kept
    pub fn decayed(&self, record: &InterestRecord, now: DateTime<Utc>) -> InterestRecord {
        InterestRecord {
            score: self.decayed_score(record, now),
            ..record.clone()
        }
    }

    /// Decay-then-add; `existing` of `None` creates a fresh record
    pub fn accumulate(
        &self,
        existing: Option<&InterestRecord>,
        user_id: &str,
        tag: &str,
        increment: f64,
        now: DateTime<Utc>,
    ) -> InterestRecord {
        match existing {
            Some(record) => InterestRecord {
                user_id: record.user_id.clone(),
                tag: record.tag.clone(),
                score: self.decayed_score(record, now) + increment,
                interaction_count: record.interaction_count + 1,
                last_updated: now,
                last_interaction: now,
            },
            None => InterestRecord::new(user_id, tag, increment, now),
        }
    }

    /// Sweep result for a cold record: pending decay folded in, then `factor`
    pub fn swept(&self, record: &InterestRecord, factor: f64, now: DateTime<Utc>) -> InterestRecord {
        InterestRecord {
            score: self.decayed_score(record, now) * factor,
            last_updated: now,
            ..record.clone()
        }
    }

    /// Top `n` tags by decayed score at a single instant
    pub fn rank(&self, records: &[InterestRecord], now: DateTime<Utc>, n: usize) -> Vec<TagScore> {
        let mut ranked: Vec<TagScore> = records
            .iter()
            .map(|r| TagScore {
                tag: r.tag.clone(),
                score: self.decayed_score(r, now),
            })
            .filter(|t| t.score >= self.min_score)
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.tag.cmp(&b.tag)));
        ranked.truncate(n);
        ranked
    }
}
