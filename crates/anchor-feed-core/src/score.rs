//! Engagement score: a fixed linear ranking formula.
//!
//! ```text
//! score = likes × 2 + clones × 3 + comments × 1
//! ```
//!
//! Clones carry the most weight (curation intent), comments the least.
//! Scores are never computed on the request path; mutations schedule a
//! [`recompute`], which the store applies to its counters in one atomic
//! step. Overlapping recomputes for the same anchor therefore cannot write a
//! score derived from an older counter snapshot.

use anyhow::Result;
use uuid::Uuid;

use crate::models::Anchor;
use crate::store::CounterWriter;

pub const LIKE_WEIGHT: i64 = 2;
pub const CLONE_WEIGHT: i64 = 3;
pub const COMMENT_WEIGHT: i64 = 1;

/// Compute the score from raw counters.
///
/// Counters can be transiently negative between a decrement and its
/// zero-floor correction, so each input is floored at zero first.
pub fn engagement_score(likes: i64, clones: i64, comments: i64) -> i64 {
    likes.max(0) * LIKE_WEIGHT + clones.max(0) * CLONE_WEIGHT + comments.max(0) * COMMENT_WEIGHT
}

pub fn score_for(anchor: &Anchor) -> i64 {
    engagement_score(anchor.like_count, anchor.clone_count, anchor.comment_count)
}

/// Persist an anchor's score from its current counters.
///
/// Returns the new score, or `None` if the anchor no longer exists.
pub async fn recompute(counters: &dyn CounterWriter, anchor_id: Uuid) -> Result<Option<i64>> {
    counters.recompute_engagement_score(anchor_id).await
}
