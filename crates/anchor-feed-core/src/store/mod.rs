//! Collaborator traits for Anchor Feed.
//!
//! The engine never owns persistence. It reads content, the social graph,
//! identities, and viewer engagement through the read traits, and writes
//! edges, counters, and notifications through the narrow write traits.
//! Each backend (SQLite, in-memory) implements all of them; services take
//! each collaborator as its own `Arc<dyn Trait>` so they can be swapped
//! independently in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Trait | Role |
//! |-------|------|
//! | [`ContentReader`] | Filtered, sorted, limited anchor reads; preview items |
//! | [`SocialGraphReader`] | Follow sets, follow status, anchor followers, watermarks |
//! | [`IdentityReader`] | Batched user profile lookups |
//! | [`EngagementReader`] | Viewer like/clone sets, recent likers |
//! | [`EdgeWriter`] | Idempotent like/follow/clone edge writes |
//! | [`CounterWriter`] | Atomic counter increments, zero-floor clamp, atomic score recompute |
//! | [`NotificationSink`] | Persist fanned-out notifications |

pub mod memory;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Anchor, Item, Notification, UserProfile};
use crate::query::ContentQuery;

/// A denormalized counter the engine maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// `anchors.like_count`
    Likes,
    /// `anchors.clone_count`
    Clones,
    /// `anchors.comment_count`
    Comments,
    /// `users.follower_count`
    Followers,
    /// `users.following_count`
    Following,
}

impl Counter {
    /// `(table, column)` holding this counter.
    pub fn location(&self) -> (&'static str, &'static str) {
        match self {
            Counter::Likes => ("anchors", "like_count"),
            Counter::Clones => ("anchors", "clone_count"),
            Counter::Comments => ("anchors", "comment_count"),
            Counter::Followers => ("users", "follower_count"),
            Counter::Following => ("users", "following_count"),
        }
    }
}

#[async_trait]
pub trait ContentReader: Send + Sync {
    /// Execute a filtered, sorted, limited read.
    async fn query(&self, query: &ContentQuery) -> Result<Vec<Anchor>>;

    /// Fetch one anchor by id, including soft-deleted ones.
    async fn get_anchor(&self, id: Uuid) -> Result<Option<Anchor>>;

    /// First `per_anchor` sub-items of each anchor, ordered by position.
    async fn get_preview_items(
        &self,
        anchor_ids: &[Uuid],
        per_anchor: usize,
    ) -> Result<HashMap<Uuid, Vec<Item>>>;

    /// Ids of every anchor, deleted or not.
    async fn list_anchor_ids(&self) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait SocialGraphReader: Send + Sync {
    /// Users that `user_id` follows.
    async fn get_following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    /// For each candidate, whether `user_id` follows them.
    async fn get_following_status(
        &self,
        user_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>>;

    /// Followers of an anchor that opted into update notifications.
    async fn get_notification_enabled_followers(&self, anchor_id: Uuid) -> Result<Vec<Uuid>>;

    /// `last_seen_version` for each of the anchors `user_id` follows.
    /// Anchors the user does not follow are absent from the map.
    async fn get_anchor_watermarks(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>>;
}

#[async_trait]
pub trait IdentityReader: Send + Sync {
    async fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>>;

    /// Case-insensitive username lookup.
    async fn get_users_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserProfile>>;
}

#[async_trait]
pub trait EngagementReader: Send + Sync {
    /// Subset of `anchor_ids` that `user_id` has liked.
    async fn get_liked_anchor_ids(&self, user_id: Uuid, anchor_ids: &[Uuid])
        -> Result<HashSet<Uuid>>;

    /// Subset of `anchor_ids` that `user_id` has cloned.
    async fn get_cloned_anchor_ids(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>>;

    /// Up to `per_anchor` most-recent likers of each anchor, newest first.
    async fn get_recent_likers(
        &self,
        anchor_ids: &[Uuid],
        per_anchor: usize,
    ) -> Result<HashMap<Uuid, Vec<Uuid>>>;
}

/// Edge writes. Every insert returns `true` only when a new edge was
/// created and every delete returns `true` only when an edge was removed,
/// so callers can keep counters idempotent.
#[async_trait]
pub trait EdgeWriter: Send + Sync {
    async fn insert_like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool>;
    async fn delete_like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool>;

    async fn insert_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;
    async fn delete_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool>;

    /// Create or update an anchor follow; the watermark is set to `seen_version`.
    async fn upsert_anchor_follow(
        &self,
        user_id: Uuid,
        anchor_id: Uuid,
        notify_on_update: bool,
        seen_version: i64,
    ) -> Result<bool>;
    async fn delete_anchor_follow(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool>;

    /// Move the watermark of an existing anchor follow. Returns `false`
    /// when the user does not follow the anchor.
    async fn set_seen_version(&self, user_id: Uuid, anchor_id: Uuid, version: i64)
        -> Result<bool>;

    async fn insert_clone(
        &self,
        user_id: Uuid,
        source_anchor_id: Uuid,
        clone_anchor_id: Uuid,
    ) -> Result<bool>;
}

#[async_trait]
pub trait CounterWriter: Send + Sync {
    /// Atomically add `delta` and return the resulting value.
    async fn increment_counter(&self, counter: Counter, id: Uuid, delta: i64) -> Result<i64>;

    /// Reset the counter to zero if it is negative.
    async fn clamp_counter(&self, counter: Counter, id: Uuid) -> Result<()>;

    /// Rewrite `engagement_score` from the counters as they are stored at
    /// the moment of the write, in one atomic step. Returns the new score,
    /// or `None` if the anchor does not exist.
    async fn recompute_engagement_score(&self, anchor_id: Uuid) -> Result<Option<i64>>;

    /// Bump `version` and `item_count`, set `last_item_added_at`.
    /// Returns the new version.
    async fn record_item_added(&self, anchor_id: Uuid, at: DateTime<Utc>) -> Result<i64>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_notifications(&self, notifications: &[Notification]) -> Result<()>;
}
