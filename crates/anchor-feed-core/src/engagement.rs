//! Engagement mutations: likes, follows, clones, comments, and item adds.
//!
//! Each operation writes at most one edge, adjusts the denormalized
//! counters only when that edge actually changed, and schedules the score
//! recomputation and notification fan-out on the [`TaskDispatcher`]. None of
//! them waits for background work.
//!
//! Counters move by single atomic increments. A decrement that lands below
//! zero is followed by a best-effort clamp; a failed clamp is logged and the
//! next recompute floors the value anyway.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::FeedError;
use crate::models::Anchor;
use crate::notify::{AnchorRef, CommentEvent, EngagementEvent};
use crate::store::{ContentReader, Counter, CounterWriter, EdgeWriter, IdentityReader};
use crate::tasks::{BackgroundTask, TaskDispatcher};

/// A comment as reported by the comment system.
#[derive(Debug, Clone)]
pub struct CommentInput {
    pub comment_id: Uuid,
    pub author_id: Uuid,
    pub anchor_id: Uuid,
    pub body: String,
}

pub struct EngagementService {
    content: Arc<dyn ContentReader>,
    identity: Arc<dyn IdentityReader>,
    edges: Arc<dyn EdgeWriter>,
    counters: Arc<dyn CounterWriter>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl EngagementService {
    pub fn new(
        content: Arc<dyn ContentReader>,
        identity: Arc<dyn IdentityReader>,
        edges: Arc<dyn EdgeWriter>,
        counters: Arc<dyn CounterWriter>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            content,
            identity,
            edges,
            counters,
            dispatcher,
        }
    }

    /// Like an anchor. Returns `false` if the viewer already liked it.
    pub async fn like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool, FeedError> {
        let anchor = self.accessible_anchor(anchor_id, user_id).await?;
        if !self.edges.insert_like(user_id, anchor_id).await? {
            return Ok(false);
        }
        self.counters
            .increment_counter(Counter::Likes, anchor_id, 1)
            .await?;
        self.schedule_score(anchor_id);
        self.schedule_fan_out(EngagementEvent::Liked {
            actor_id: user_id,
            anchor: AnchorRef::from(&anchor),
        });
        Ok(true)
    }

    /// Remove a like. Returns `false` if there was none.
    ///
    /// Works whatever the anchor's current visibility, so a like on an
    /// anchor that has since gone private or been deleted can still be
    /// taken back.
    pub async fn unlike(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool, FeedError> {
        if !self.edges.delete_like(user_id, anchor_id).await? {
            return Ok(false);
        }
        if self.content.get_anchor(anchor_id).await?.is_some() {
            self.decrement(Counter::Likes, anchor_id).await?;
            self.schedule_score(anchor_id);
        }
        Ok(true)
    }

    pub async fn follow_user(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool, FeedError> {
        if follower_id == followee_id {
            return Err(FeedError::InvalidParameter {
                field: "userId",
                message: "users cannot follow themselves".to_string(),
            });
        }
        self.require_users(&[follower_id, followee_id]).await?;
        if !self.edges.insert_follow(follower_id, followee_id).await? {
            return Ok(false);
        }
        self.counters
            .increment_counter(Counter::Followers, followee_id, 1)
            .await?;
        self.counters
            .increment_counter(Counter::Following, follower_id, 1)
            .await?;
        self.schedule_fan_out(EngagementEvent::Followed {
            follower_id,
            followee_id,
        });
        Ok(true)
    }

    pub async fn unfollow_user(
        &self,
        follower_id: Uuid,
        followee_id: Uuid,
    ) -> Result<bool, FeedError> {
        if !self.edges.delete_follow(follower_id, followee_id).await? {
            return Ok(false);
        }
        // Either side may have been deleted since the follow; only live
        // users still carry counters.
        let live = self
            .identity
            .get_users_by_ids(&[follower_id, followee_id])
            .await?;
        if live.iter().any(|u| u.id == followee_id) {
            self.decrement(Counter::Followers, followee_id).await?;
        }
        if live.iter().any(|u| u.id == follower_id) {
            self.decrement(Counter::Following, follower_id).await?;
        }
        Ok(true)
    }

    /// Follow an anchor for updates. The watermark starts at the current
    /// version, so nothing already there counts as unseen. Re-following
    /// only changes `notify_on_update`.
    pub async fn follow_anchor(
        &self,
        user_id: Uuid,
        anchor_id: Uuid,
        notify_on_update: bool,
    ) -> Result<bool, FeedError> {
        let anchor = self.accessible_anchor(anchor_id, user_id).await?;
        let created = self
            .edges
            .upsert_anchor_follow(user_id, anchor_id, notify_on_update, anchor.version)
            .await?;
        Ok(created)
    }

    /// Like [`unlike`](Self::unlike), succeeds after the anchor became
    /// inaccessible.
    pub async fn unfollow_anchor(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool, FeedError> {
        Ok(self.edges.delete_anchor_follow(user_id, anchor_id).await?)
    }

    /// Move the viewer's watermark to the anchor's current version.
    /// Returns `false` when the viewer does not follow the anchor.
    pub async fn mark_anchor_seen(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool, FeedError> {
        let anchor = self.accessible_anchor(anchor_id, user_id).await?;
        Ok(self
            .edges
            .set_seen_version(user_id, anchor_id, anchor.version)
            .await?)
    }

    /// Record that `user_id` cloned `source_id` into `clone_id`.
    pub async fn record_clone(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        clone_id: Uuid,
    ) -> Result<bool, FeedError> {
        let source = self.accessible_anchor(source_id, user_id).await?;
        if !self.edges.insert_clone(user_id, source_id, clone_id).await? {
            return Ok(false);
        }
        self.counters
            .increment_counter(Counter::Clones, source_id, 1)
            .await?;
        self.schedule_score(source_id);
        self.schedule_fan_out(EngagementEvent::Cloned {
            actor_id: user_id,
            source: AnchorRef::from(&source),
            clone_id,
        });
        Ok(true)
    }

    pub async fn comment_created(&self, comment: CommentInput) -> Result<(), FeedError> {
        let anchor = self
            .accessible_anchor(comment.anchor_id, comment.author_id)
            .await?;
        self.counters
            .increment_counter(Counter::Comments, anchor.id, 1)
            .await?;
        self.schedule_score(anchor.id);
        self.schedule_fan_out(EngagementEvent::CommentCreated(comment_event(
            &comment, &anchor,
        )));
        Ok(())
    }

    /// Only mentions added by the edit are notified.
    pub async fn comment_edited(
        &self,
        comment: CommentInput,
        previous_body: String,
    ) -> Result<(), FeedError> {
        let anchor = self
            .accessible_anchor(comment.anchor_id, comment.author_id)
            .await?;
        self.schedule_fan_out(EngagementEvent::CommentEdited {
            comment: comment_event(&comment, &anchor),
            previous_body,
        });
        Ok(())
    }

    /// The anchor only has to exist; a comment stays removable after the
    /// anchor goes private or is deleted.
    pub async fn comment_deleted(&self, author_id: Uuid, anchor_id: Uuid) -> Result<(), FeedError> {
        if self.content.get_anchor(anchor_id).await?.is_none() {
            debug!(author = %author_id, anchor = %anchor_id, "comment deleted on missing anchor");
            return Err(FeedError::NotFound(format!("anchor {}", anchor_id)));
        }
        self.decrement(Counter::Comments, anchor_id).await?;
        self.schedule_score(anchor_id);
        Ok(())
    }

    /// Bump the anchor's version and notify its followers.
    /// Returns the new version.
    pub async fn item_added(
        &self,
        actor_id: Uuid,
        anchor_id: Uuid,
        item_summary: &str,
    ) -> Result<i64, FeedError> {
        let anchor = self.accessible_anchor(anchor_id, actor_id).await?;
        let version = self
            .counters
            .record_item_added(anchor_id, Utc::now())
            .await?;
        debug!(anchor = %anchor_id, version, "item added");
        self.schedule_fan_out(EngagementEvent::AnchorUpdated {
            actor_id,
            anchor: AnchorRef::from(&anchor),
            item_summary: item_summary.to_string(),
        });
        Ok(version)
    }

    /// Missing, deleted, and other users' private anchors all look the same.
    async fn accessible_anchor(&self, anchor_id: Uuid, viewer: Uuid) -> Result<Anchor, FeedError> {
        match self.content.get_anchor(anchor_id).await? {
            Some(anchor) if anchor.is_visible_to(Some(viewer)) => Ok(anchor),
            _ => Err(FeedError::NotFound(format!("anchor {}", anchor_id))),
        }
    }

    async fn require_users(&self, ids: &[Uuid]) -> Result<(), FeedError> {
        let found = self.identity.get_users_by_ids(ids).await?;
        match ids.iter().find(|id| !found.iter().any(|u| u.id == **id)) {
            Some(missing) => Err(FeedError::NotFound(format!("user {}", missing))),
            None => Ok(()),
        }
    }

    async fn decrement(&self, counter: Counter, id: Uuid) -> Result<(), FeedError> {
        let value = self.counters.increment_counter(counter, id, -1).await?;
        if value < 0 {
            if let Err(e) = self.counters.clamp_counter(counter, id).await {
                warn!(counter = ?counter, id = %id, error = %e, "counter clamp failed");
            }
        }
        Ok(())
    }

    fn schedule_score(&self, anchor_id: Uuid) {
        self.dispatcher
            .dispatch(BackgroundTask::RecomputeScore { anchor_id });
    }

    fn schedule_fan_out(&self, event: EngagementEvent) {
        self.dispatcher.dispatch(BackgroundTask::FanOut(event));
    }
}

fn comment_event(comment: &CommentInput, anchor: &Anchor) -> CommentEvent {
    CommentEvent {
        comment_id: comment.comment_id,
        author_id: comment.author_id,
        anchor: AnchorRef::from(anchor),
        body: comment.body.clone(),
    }
}
