//! Notification fan-out.
//!
//! [`FanoutService::build`] turns one [`EngagementEvent`] into the set of
//! notifications it implies; [`FanoutService::fan_out`] builds and hands the
//! batch to the [`NotificationSink`]. The dedup rules:
//!
//! - nobody is notified about their own action
//! - a comment mentioning the anchor owner yields one `mention` for the
//!   owner, not a `mention` and a `comment`
//! - an edited comment notifies only mentions that were not already there
//! - mentions are matched case-insensitively and capped per comment

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    truncate_chars, Anchor, Notification, NotificationType, ResourceKind, ResourceRef,
};
use crate::store::{IdentityReader, NotificationSink, SocialGraphReader};

/// Mentioned users notified per comment, counted after resolution.
pub const MAX_MENTIONS: usize = 10;
/// Longest username a mention can name.
pub const MAX_USERNAME_CHARS: usize = 30;
/// Notification preview length.
pub const PREVIEW_MAX_CHARS: usize = 100;

/// The parts of an anchor fan-out needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorRef {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
}

impl From<&Anchor> for AnchorRef {
    fn from(anchor: &Anchor) -> Self {
        Self {
            id: anchor.id,
            owner_id: anchor.owner_id,
            title: anchor.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentEvent {
    pub comment_id: Uuid,
    pub author_id: Uuid,
    pub anchor: AnchorRef,
    pub body: String,
}

/// A mutation that may produce notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum EngagementEvent {
    CommentCreated(CommentEvent),
    CommentEdited {
        comment: CommentEvent,
        previous_body: String,
    },
    Liked {
        actor_id: Uuid,
        anchor: AnchorRef,
    },
    Followed {
        follower_id: Uuid,
        followee_id: Uuid,
    },
    Cloned {
        actor_id: Uuid,
        source: AnchorRef,
        clone_id: Uuid,
    },
    AnchorUpdated {
        actor_id: Uuid,
        anchor: AnchorRef,
        item_summary: String,
    },
}

impl EngagementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngagementEvent::CommentCreated(_) => "comment_created",
            EngagementEvent::CommentEdited { .. } => "comment_edited",
            EngagementEvent::Liked { .. } => "liked",
            EngagementEvent::Followed { .. } => "followed",
            EngagementEvent::Cloned { .. } => "cloned",
            EngagementEvent::AnchorUpdated { .. } => "anchor_updated",
        }
    }
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Extract `@username` mentions, lowercased and deduplicated in
/// first-seen order. Not capped: [`MAX_MENTIONS`] applies to the users the
/// names resolve to.
///
/// A mention starts at `@` preceded by the start of text or a character
/// that cannot appear in a username, so `me@example.com` is not one.
/// Runs longer than [`MAX_USERNAME_CHARS`] are ignored.
pub fn parse_mentions(body: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = prev.map_or(true, |p| !is_username_char(p) && p != '@');
        prev = Some(c);
        if c != '@' || !at_boundary {
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while let Some(&(j, n)) = chars.peek() {
            if !is_username_char(n) {
                break;
            }
            end = j + n.len_utf8();
            prev = Some(n);
            chars.next();
        }

        let name = &body[start..end];
        if name.is_empty() || name.len() > MAX_USERNAME_CHARS {
            continue;
        }
        let name = name.to_ascii_lowercase();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

pub struct FanoutService {
    graph: Arc<dyn SocialGraphReader>,
    identity: Arc<dyn IdentityReader>,
    sink: Arc<dyn NotificationSink>,
}

impl FanoutService {
    pub fn new(
        graph: Arc<dyn SocialGraphReader>,
        identity: Arc<dyn IdentityReader>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            graph,
            identity,
            sink,
        }
    }

    /// Build and deliver the notifications for `event`.
    /// Returns how many were handed to the sink.
    pub async fn fan_out(&self, event: &EngagementEvent) -> Result<usize> {
        let notifications = self.build(event).await?;
        if notifications.is_empty() {
            debug!(event = event.name(), "no recipients");
            return Ok(0);
        }
        self.sink.create_notifications(&notifications).await?;
        debug!(
            event = event.name(),
            count = notifications.len(),
            "notifications delivered"
        );
        Ok(notifications.len())
    }

    /// The notifications `event` implies, without delivering them.
    pub async fn build(&self, event: &EngagementEvent) -> Result<Vec<Notification>> {
        let out = match event {
            EngagementEvent::CommentCreated(comment) => {
                let mentioned = self
                    .resolve_mentions(&parse_mentions(&comment.body), comment.author_id)
                    .await;
                let mut out: Vec<Notification> = mentioned
                    .iter()
                    .map(|id| comment_notification(comment, *id, NotificationType::Mention))
                    .collect();
                let owner = comment.anchor.owner_id;
                if owner != comment.author_id && !mentioned.contains(&owner) {
                    out.push(comment_notification(comment, owner, NotificationType::Comment));
                }
                out
            }
            EngagementEvent::CommentEdited {
                comment,
                previous_body,
            } => {
                let previous: HashSet<String> = parse_mentions(previous_body).into_iter().collect();
                let added: Vec<String> = parse_mentions(&comment.body)
                    .into_iter()
                    .filter(|m| !previous.contains(m))
                    .collect();
                self.resolve_mentions(&added, comment.author_id)
                    .await
                    .iter()
                    .map(|id| comment_notification(comment, *id, NotificationType::Mention))
                    .collect()
            }
            EngagementEvent::Liked { actor_id, anchor } => single(
                anchor.owner_id,
                *actor_id,
                NotificationType::Like,
                ResourceRef {
                    kind: ResourceKind::Anchor,
                    id: anchor.id,
                },
                Some(anchor.id),
                &anchor.title,
            ),
            EngagementEvent::Followed {
                follower_id,
                followee_id,
            } => single(
                *followee_id,
                *follower_id,
                NotificationType::Follow,
                ResourceRef {
                    kind: ResourceKind::User,
                    id: *follower_id,
                },
                None,
                "started following you",
            ),
            EngagementEvent::Cloned {
                actor_id,
                source,
                clone_id,
            } => single(
                source.owner_id,
                *actor_id,
                NotificationType::Clone,
                ResourceRef {
                    kind: ResourceKind::Anchor,
                    id: *clone_id,
                },
                Some(source.id),
                &source.title,
            ),
            EngagementEvent::AnchorUpdated {
                actor_id,
                anchor,
                item_summary,
            } => {
                let preview = format!("{}: {}", anchor.title, item_summary);
                self.graph
                    .get_notification_enabled_followers(anchor.id)
                    .await?
                    .into_iter()
                    .filter(|follower| follower != actor_id)
                    .map(|follower| {
                        notification(
                            follower,
                            *actor_id,
                            NotificationType::AnchorUpdate,
                            ResourceRef {
                                kind: ResourceKind::Anchor,
                                id: anchor.id,
                            },
                            Some(anchor.id),
                            &preview,
                        )
                    })
                    .collect()
            }
        };
        Ok(out)
    }

    /// Resolve usernames to distinct user ids, minus `author_id`, keeping
    /// the first [`MAX_MENTIONS`] in body order.
    ///
    /// Lookup failure drops the mentions; other notifications for the
    /// same event still go out.
    async fn resolve_mentions(&self, usernames: &[String], author_id: Uuid) -> Vec<Uuid> {
        if usernames.is_empty() {
            return Vec::new();
        }
        let users = match self.identity.get_users_by_usernames(usernames).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "mention lookup failed; skipping mentions");
                return Vec::new();
            }
        };
        let mut ids: Vec<Uuid> = Vec::with_capacity(users.len());
        for name in usernames {
            if let Some(user) = users.iter().find(|u| u.username.eq_ignore_ascii_case(name)) {
                if user.id != author_id && !ids.contains(&user.id) {
                    ids.push(user.id);
                    if ids.len() == MAX_MENTIONS {
                        break;
                    }
                }
            }
        }
        ids
    }
}

fn comment_notification(
    comment: &CommentEvent,
    recipient: Uuid,
    kind: NotificationType,
) -> Notification {
    notification(
        recipient,
        comment.author_id,
        kind,
        ResourceRef {
            kind: ResourceKind::Comment,
            id: comment.comment_id,
        },
        Some(comment.anchor.id),
        &comment.body,
    )
}

/// At most one notification, never addressed to the actor.
fn single(
    recipient: Uuid,
    actor: Uuid,
    kind: NotificationType,
    resource: ResourceRef,
    anchor_id: Option<Uuid>,
    preview: &str,
) -> Vec<Notification> {
    if recipient == actor {
        return Vec::new();
    }
    vec![notification(recipient, actor, kind, resource, anchor_id, preview)]
}

fn notification(
    recipient: Uuid,
    actor: Uuid,
    kind: NotificationType,
    resource: ResourceRef,
    anchor_id: Option<Uuid>,
    preview: &str,
) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        recipient_id: recipient,
        actor_id: actor,
        kind,
        resource,
        anchor_id,
        preview: truncate_chars(preview, PREVIEW_MAX_CHARS),
        is_read: false,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::store::memory::{test_anchor, test_user, FailPoint, InMemoryStore};

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: FanoutService,
        owner: UserProfile,
        anchor: AnchorRef,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let owner = test_user("owner");
        store.insert_user(owner.clone());
        let anchor = test_anchor(owner.id, "Reading list");
        let anchor_ref = AnchorRef::from(&anchor);
        store.insert_anchor(anchor);
        let service = FanoutService::new(store.clone(), store.clone(), store.clone());
        Fixture {
            store,
            service,
            owner,
            anchor: anchor_ref,
        }
    }

    fn comment(anchor: &AnchorRef, author: Uuid, body: &str) -> CommentEvent {
        CommentEvent {
            comment_id: Uuid::new_v4(),
            author_id: author,
            anchor: anchor.clone(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_parse_mentions() {
        assert_eq!(parse_mentions("hi @Alice and @bob!"), vec!["alice", "bob"]);
        assert_eq!(parse_mentions("@alice @ALICE @Alice"), vec!["alice"]);
        assert!(parse_mentions("mail me@example.com").is_empty());
        assert!(parse_mentions("@ alone").is_empty());
        assert!(parse_mentions("@@double").is_empty());
        assert!(parse_mentions(&format!("@{}", "a".repeat(31))).is_empty());
        assert_eq!(parse_mentions("(@x_1), @y"), vec!["x_1", "y"]);
    }

    #[test]
    fn test_parse_mentions_keeps_every_name() {
        let body: String = (0..15).map(|i| format!("@user{} ", i)).collect();
        let mentions = parse_mentions(&body);
        assert_eq!(mentions.len(), 15);
        assert_eq!(mentions[14], "user14");
    }

    #[tokio::test]
    async fn test_unknown_names_do_not_use_up_mention_slots() {
        let f = fixture();
        let author = test_user("carol");
        let dave = test_user("dave");
        f.store.insert_user(author.clone());
        f.store.insert_user(dave.clone());

        let mut body: String = (0..MAX_MENTIONS).map(|i| format!("@ghost{} ", i)).collect();
        body.push_str("@carol @dave");
        let event = EngagementEvent::CommentCreated(comment(&f.anchor, author.id, &body));
        let out = f.service.build(&event).await.unwrap();

        let mentioned: Vec<Uuid> = out
            .iter()
            .filter(|n| n.kind == NotificationType::Mention)
            .map(|n| n.recipient_id)
            .collect();
        assert_eq!(mentioned, vec![dave.id]);
    }

    #[tokio::test]
    async fn test_resolved_mentions_capped() {
        let f = fixture();
        let author = test_user("carol");
        f.store.insert_user(author.clone());
        let users: Vec<UserProfile> = (0..MAX_MENTIONS + 2)
            .map(|i| test_user(&format!("user{}", i)))
            .collect();
        for u in &users {
            f.store.insert_user(u.clone());
        }

        let body: String = users.iter().map(|u| format!("@{} ", u.username)).collect();
        let event = EngagementEvent::CommentCreated(comment(&f.anchor, author.id, &body));
        let out = f.service.build(&event).await.unwrap();

        let mentioned: Vec<Uuid> = out
            .iter()
            .filter(|n| n.kind == NotificationType::Mention)
            .map(|n| n.recipient_id)
            .collect();
        let expected: Vec<Uuid> = users[..MAX_MENTIONS].iter().map(|u| u.id).collect();
        assert_eq!(mentioned, expected);
    }

    #[tokio::test]
    async fn test_comment_mentioning_owner_yields_one_notification() {
        let f = fixture();
        let commenter = test_user("carol");
        f.store.insert_user(commenter.clone());

        let event = EngagementEvent::CommentCreated(comment(&f.anchor, commenter.id, "nice @Owner"));
        let out = f.service.build(&event).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient_id, f.owner.id);
        assert_eq!(out[0].kind, NotificationType::Mention);
    }

    #[tokio::test]
    async fn test_comment_notifies_owner_and_mentions() {
        let f = fixture();
        let commenter = test_user("carol");
        let dave = test_user("dave");
        f.store.insert_user(commenter.clone());
        f.store.insert_user(dave.clone());

        let event = EngagementEvent::CommentCreated(comment(
            &f.anchor,
            commenter.id,
            "cc @dave @carol @nobody",
        ));
        let out = f.service.build(&event).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].recipient_id, dave.id);
        assert_eq!(out[0].kind, NotificationType::Mention);
        assert_eq!(out[1].recipient_id, f.owner.id);
        assert_eq!(out[1].kind, NotificationType::Comment);
        assert_eq!(out[1].resource.kind, ResourceKind::Comment);
        assert_eq!(out[1].anchor_id, Some(f.anchor.id));
    }

    #[tokio::test]
    async fn test_owner_commenting_notifies_nobody() {
        let f = fixture();
        let event = EngagementEvent::CommentCreated(comment(&f.anchor, f.owner.id, "@owner hi"));
        assert!(f.service.build(&event).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_notifies_only_new_mentions() {
        let f = fixture();
        let author = test_user("carol");
        let dave = test_user("dave");
        let erin = test_user("erin");
        for u in [&author, &dave, &erin] {
            f.store.insert_user(u.clone());
        }

        let unchanged = EngagementEvent::CommentEdited {
            comment: comment(&f.anchor, author.id, "hey @DAVE, fixed typo"),
            previous_body: "hey @dave".into(),
        };
        assert!(f.service.build(&unchanged).await.unwrap().is_empty());

        let added = EngagementEvent::CommentEdited {
            comment: comment(&f.anchor, author.id, "hey @dave and @erin"),
            previous_body: "hey @dave".into(),
        };
        let out = f.service.build(&added).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient_id, erin.id);
    }

    #[tokio::test]
    async fn test_self_actions_suppressed() {
        let f = fixture();
        let like = EngagementEvent::Liked {
            actor_id: f.owner.id,
            anchor: f.anchor.clone(),
        };
        assert!(f.service.build(&like).await.unwrap().is_empty());

        let other = Uuid::new_v4();
        let like = EngagementEvent::Liked {
            actor_id: other,
            anchor: f.anchor.clone(),
        };
        let out = f.service.build(&like).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient_id, f.owner.id);
        assert_eq!(out[0].actor_id, other);
    }

    #[tokio::test]
    async fn test_anchor_update_notifies_opted_in_followers() {
        let f = fixture();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        f.store.add_anchor_follow(a, f.anchor.id, true, 0);
        f.store.add_anchor_follow(b, f.anchor.id, false, 0);
        f.store.add_anchor_follow(c, f.anchor.id, true, 0);
        f.store.add_anchor_follow(f.owner.id, f.anchor.id, true, 0);

        let event = EngagementEvent::AnchorUpdated {
            actor_id: f.owner.id,
            anchor: f.anchor.clone(),
            item_summary: "New article".into(),
        };
        let delivered = f.service.fan_out(&event).await.unwrap();
        assert_eq!(delivered, 2);

        let stored = f.store.notifications();
        let recipients: HashSet<Uuid> = stored.iter().map(|n| n.recipient_id).collect();
        assert_eq!(recipients, [a, c].into_iter().collect());
        assert_eq!(stored[0].preview, "Reading list: New article");
        assert_eq!(stored[0].kind, NotificationType::AnchorUpdate);
    }

    #[tokio::test]
    async fn test_preview_truncated() {
        let f = fixture();
        let event = EngagementEvent::CommentCreated(comment(
            &f.anchor,
            Uuid::new_v4(),
            &"x".repeat(300),
        ));
        let out = f.service.build(&event).await.unwrap();
        assert_eq!(out[0].preview.chars().count(), PREVIEW_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_sink_failure_is_an_error_for_the_caller_to_log() {
        let f = fixture();
        f.store.fail(FailPoint::Notifications);
        let event = EngagementEvent::Followed {
            follower_id: Uuid::new_v4(),
            followee_id: f.owner.id,
        };
        assert!(f.service.fan_out(&event).await.is_err());
    }

    #[tokio::test]
    async fn test_mention_lookup_failure_still_notifies_owner() {
        let f = fixture();
        f.store.fail(FailPoint::Identity);
        let event = EngagementEvent::CommentCreated(comment(&f.anchor, Uuid::new_v4(), "@dave"));
        let out = f.service.build(&event).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, NotificationType::Comment);
    }
}
