//! Store-level query language for content reads.
//!
//! A [`ContentQuery`] is a conjunction of equality, range, and set-membership
//! filters, a descending sort over a fixed key list ending in `id`, an
//! optional seek predicate, and a row limit. Stores translate it into their
//! native query form (SQL for SQLite, closures for the in-memory store); no
//! joins are expressed here.
//!
//! # Seek predicates
//!
//! Cursor pagination resumes strictly after the last seen row. For sort keys
//! `(k1, k2, id)` all descending, "after" means lexicographically smaller:
//!
//! ```text
//! k1 < v1
//! OR (k1 = v1 AND k2 < v2)
//! OR (k1 = v1 AND k2 = v2 AND id < v3)
//! ```
//!
//! [`SeekPredicate::after`] builds exactly this OR-of-ANDs, and
//! [`SeekPredicate::matches`] evaluates it against an [`Anchor`].

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cursor::{CursorShape, FeedCursor};
use crate::models::{Anchor, Visibility};

/// A sortable anchor column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    EngagementScore,
    CreatedAt,
    LastItemAddedAt,
    Id,
}

impl SortField {
    /// Column name in the `anchors` table.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::EngagementScore => "engagement_score",
            SortField::CreatedAt => "created_at",
            SortField::LastItemAddedAt => "last_item_added_at",
            SortField::Id => "id",
        }
    }

    pub fn value_of(&self, anchor: &Anchor) -> SortValue {
        match self {
            SortField::EngagementScore => SortValue::Score(anchor.engagement_score),
            SortField::CreatedAt => SortValue::Timestamp(anchor.created_at),
            SortField::LastItemAddedAt => SortValue::Timestamp(anchor.last_item_added_at),
            SortField::Id => SortValue::Id(anchor.id),
        }
    }
}

/// A value one of the sort keys can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortValue {
    Score(i64),
    Timestamp(DateTime<Utc>),
    Id(Uuid),
}

/// The orderings the feeds use. Every key sorts descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSort {
    /// `last_item_added_at DESC, id DESC`: home feed.
    RecentActivity,
    /// `created_at DESC, id DESC`: "recent" discovery and tag feeds.
    Newest,
    /// `engagement_score DESC, created_at DESC, id DESC`.
    Score,
}

impl FeedSort {
    pub fn keys(&self) -> &'static [SortField] {
        match self {
            FeedSort::RecentActivity => &[SortField::LastItemAddedAt, SortField::Id],
            FeedSort::Newest => &[SortField::CreatedAt, SortField::Id],
            FeedSort::Score => &[
                SortField::EngagementScore,
                SortField::CreatedAt,
                SortField::Id,
            ],
        }
    }

    pub fn cursor_shape(&self) -> CursorShape {
        match self {
            FeedSort::Score => CursorShape::Scored,
            FeedSort::RecentActivity | FeedSort::Newest => CursorShape::Recency,
        }
    }

    /// The cursor pointing at `anchor`'s position under this sort.
    pub fn cursor_for(&self, anchor: &Anchor) -> FeedCursor {
        match self {
            FeedSort::RecentActivity => FeedCursor::recency(anchor.last_item_added_at, anchor.id),
            FeedSort::Newest => FeedCursor::recency(anchor.created_at, anchor.id),
            FeedSort::Score => {
                FeedCursor::scored(anchor.engagement_score, anchor.created_at, anchor.id)
            }
        }
    }

    /// Sort values of a decoded cursor, aligned with [`keys`](Self::keys).
    fn cursor_values(&self, cursor: &FeedCursor) -> Vec<SortValue> {
        let mut values = Vec::with_capacity(3);
        if let FeedSort::Score = self {
            values.push(SortValue::Score(cursor.score.unwrap_or_default()));
        }
        values.push(SortValue::Timestamp(cursor.timestamp));
        values.push(SortValue::Id(cursor.id));
        values
    }

    /// Descending comparison of two anchors under this sort.
    pub fn compare(&self, a: &Anchor, b: &Anchor) -> Ordering {
        for key in self.keys() {
            let ord = key.value_of(b).cmp(&key.value_of(a));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Lt,
}

/// One `field <op> value` term of a seek clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekTerm {
    pub field: SortField,
    pub op: Comparison,
    pub value: SortValue,
}

/// A disjunction of conjunctions of [`SeekTerm`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekPredicate {
    pub clauses: Vec<Vec<SeekTerm>>,
}

impl SeekPredicate {
    /// Rows strictly after `cursor` under `sort`.
    pub fn after(sort: FeedSort, cursor: &FeedCursor) -> Self {
        let keys = sort.keys();
        let values = sort.cursor_values(cursor);

        let clauses = (0..keys.len())
            .map(|i| {
                let mut clause: Vec<SeekTerm> = (0..i)
                    .map(|j| SeekTerm {
                        field: keys[j],
                        op: Comparison::Eq,
                        value: values[j],
                    })
                    .collect();
                clause.push(SeekTerm {
                    field: keys[i],
                    op: Comparison::Lt,
                    value: values[i],
                });
                clause
            })
            .collect();

        Self { clauses }
    }

    pub fn matches(&self, anchor: &Anchor) -> bool {
        self.clauses.iter().any(|clause| {
            clause.iter().all(|term| {
                let actual = term.field.value_of(anchor);
                match term.op {
                    Comparison::Eq => actual == term.value,
                    Comparison::Lt => actual < term.value,
                }
            })
        })
    }
}

/// Filter terms. Soft-deleted anchors are always excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentFilter {
    /// `visibility IN (...)`; empty means any.
    pub visibilities: Vec<Visibility>,
    /// `owner_id IN (...)` when set.
    pub owner_in: Option<Vec<Uuid>>,
    /// `owner_id NOT IN (...)`.
    pub owner_not_in: Vec<Uuid>,
    /// Lowercase tag equality.
    pub tag: Option<String>,
    /// `created_at >= ...`.
    pub created_since: Option<DateTime<Utc>>,
}

impl ContentFilter {
    pub fn matches(&self, anchor: &Anchor) -> bool {
        if anchor.is_deleted() {
            return false;
        }
        if !self.visibilities.is_empty() && !self.visibilities.contains(&anchor.visibility) {
            return false;
        }
        if let Some(owners) = &self.owner_in {
            if !owners.contains(&anchor.owner_id) {
                return false;
            }
        }
        if self.owner_not_in.contains(&anchor.owner_id) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !anchor.has_tag(tag) {
                return false;
            }
        }
        if let Some(since) = self.created_since {
            if anchor.created_at < since {
                return false;
            }
        }
        true
    }
}

/// A complete content read.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentQuery {
    pub filter: ContentFilter,
    pub sort: FeedSort,
    pub seek: Option<SeekPredicate>,
    pub limit: usize,
}

impl ContentQuery {
    pub fn matches(&self, anchor: &Anchor) -> bool {
        self.filter.matches(anchor) && self.seek.as_ref().map_or(true, |s| s.matches(anchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn anchor_at(score: i64, created_offset_secs: i64) -> Anchor {
        let mut a = Anchor::new(Uuid::new_v4(), "x", Visibility::Public);
        a.engagement_score = score;
        a.created_at = a.created_at - Duration::seconds(created_offset_secs);
        a.last_item_added_at = a.created_at;
        a
    }

    #[test]
    fn test_seek_clauses_shape() {
        let cursor = FeedCursor::scored(10, Utc::now(), Uuid::new_v4());
        let seek = SeekPredicate::after(FeedSort::Score, &cursor);
        assert_eq!(seek.clauses.len(), 3);
        assert_eq!(seek.clauses[0].len(), 1);
        assert_eq!(seek.clauses[0][0].op, Comparison::Lt);
        assert_eq!(seek.clauses[2].len(), 3);
        assert_eq!(seek.clauses[2][0].op, Comparison::Eq);
        assert_eq!(seek.clauses[2][1].op, Comparison::Eq);
        assert_eq!(seek.clauses[2][2].field, SortField::Id);
    }

    #[test]
    fn test_seek_breaks_ties_by_next_key() {
        let pivot = anchor_at(10, 100);
        let cursor = FeedSort::Score.cursor_for(&pivot);
        let seek = SeekPredicate::after(FeedSort::Score, &cursor);

        // lower score, any time
        assert!(seek.matches(&anchor_at(9, 0)));
        // higher score
        assert!(!seek.matches(&anchor_at(11, 500)));
        // same score, older
        assert!(seek.matches(&anchor_at(10, 200)));
        // same score, newer
        assert!(!seek.matches(&anchor_at(10, 50)));
        // the pivot itself is never "after" itself
        assert!(!seek.matches(&pivot));
    }

    #[test]
    fn test_seek_id_tiebreak() {
        let mut a = anchor_at(0, 0);
        let mut b = a.clone();
        a.id = Uuid::from_u128(2);
        b.id = Uuid::from_u128(1);
        let seek = SeekPredicate::after(FeedSort::Newest, &FeedSort::Newest.cursor_for(&a));
        assert!(seek.matches(&b));
        let seek = SeekPredicate::after(FeedSort::Newest, &FeedSort::Newest.cursor_for(&b));
        assert!(!seek.matches(&a));
    }

    #[test]
    fn test_compare_orders_descending() {
        let mut rows = vec![anchor_at(1, 0), anchor_at(5, 10), anchor_at(5, 0)];
        rows.sort_by(|a, b| FeedSort::Score.compare(a, b));
        assert_eq!(rows[0].engagement_score, 5);
        assert!(rows[0].created_at > rows[1].created_at);
        assert_eq!(rows[2].engagement_score, 1);
    }

    #[test]
    fn test_filter_excludes_deleted_and_wrong_visibility() {
        let filter = ContentFilter {
            visibilities: vec![Visibility::Public],
            ..Default::default()
        };
        let mut a = anchor_at(0, 0);
        assert!(filter.matches(&a));
        a.visibility = Visibility::Unlisted;
        assert!(!filter.matches(&a));
        a.visibility = Visibility::Public;
        a.deleted_at = Some(Utc::now());
        assert!(!filter.matches(&a));
    }

    #[test]
    fn test_filter_tag_case_insensitive() {
        let mut a = anchor_at(0, 0);
        a.tags = vec!["rust".into()];
        let filter = ContentFilter {
            tag: Some("RUST".into()),
            ..Default::default()
        };
        assert!(filter.matches(&a));
    }
}
