//! Core data models used throughout Anchor Feed.
//!
//! These types represent the anchors, sub-items, users, and notifications
//! that flow through the feed and fan-out pipelines. Edges (follows, likes,
//! clones) have no model of their own; they exist only inside the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who may see an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Unlisted,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Unlisted => "unlisted",
            Visibility::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Visibility::Private),
            "unlisted" => Some(Visibility::Unlisted),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

/// A user-owned, ordered collection of sub-items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Lowercase tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub visibility: Visibility,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub clone_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub item_count: i64,
    #[serde(default)]
    pub engagement_score: i64,
    /// Incremented only when a sub-item is added.
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub cloned_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_item_added_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Anchor {
    /// A fresh anchor with zeroed counters, timestamped `now`.
    pub fn new(owner_id: Uuid, title: impl Into<String>, visibility: Visibility) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            visibility,
            like_count: 0,
            clone_count: 0,
            comment_count: 0,
            item_count: 0,
            engagement_score: 0,
            version: 0,
            cloned_from: None,
            created_at: now,
            updated_at: now,
            last_item_added_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `viewer` may see this anchor at all.
    pub fn is_visible_to(&self, viewer: Option<Uuid>) -> bool {
        if self.is_deleted() {
            return false;
        }
        match self.visibility {
            Visibility::Public | Visibility::Unlisted => true,
            Visibility::Private => viewer == Some(self.owner_id),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Payload of a sub-item, one variant per item kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemContent {
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, rename = "faviconUrl", skip_serializing_if = "Option::is_none")]
        favicon_url: Option<String>,
        #[serde(default, rename = "thumbnailUrl", skip_serializing_if = "Option::is_none")]
        thumbnail_url: Option<String>,
    },
    Image {
        url: String,
        #[serde(default, rename = "thumbnailUrl", skip_serializing_if = "Option::is_none")]
        thumbnail_url: Option<String>,
    },
    Text {
        body: String,
    },
    Audio {
        url: String,
        #[serde(default, rename = "durationSecs", skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u32>,
    },
    File {
        url: String,
        filename: String,
        #[serde(default, rename = "sizeBytes", skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
}

impl ItemContent {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemContent::Url { .. } => ItemKind::Url,
            ItemContent::Image { .. } => ItemKind::Image,
            ItemContent::Text { .. } => ItemKind::Text,
            ItemContent::Audio { .. } => ItemKind::Audio,
            ItemContent::File { .. } => ItemKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Url,
    Image,
    Text,
    Audio,
    File,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Url => "url",
            ItemKind::Image => "image",
            ItemKind::Text => "text",
            ItemKind::Audio => "audio",
            ItemKind::File => "file",
        }
    }
}

/// A sub-item inside an anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Uuid,
    pub anchor_id: Uuid,
    pub position: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub content: ItemContent,
    pub created_at: DateTime<Utc>,
}

/// Public profile record resolved by the identity reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub follower_count: i64,
    #[serde(default)]
    pub following_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Mention,
    Comment,
    Like,
    Follow,
    Clone,
    AnchorUpdate,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Mention => "mention",
            NotificationType::Comment => "comment",
            NotificationType::Like => "like",
            NotificationType::Follow => "follow",
            NotificationType::Clone => "clone",
            NotificationType::AnchorUpdate => "anchor_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mention" => Some(NotificationType::Mention),
            "comment" => Some(NotificationType::Comment),
            "like" => Some(NotificationType::Like),
            "follow" => Some(NotificationType::Follow),
            "clone" => Some(NotificationType::Clone),
            "anchor_update" => Some(NotificationType::AnchorUpdate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Anchor,
    Comment,
    User,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Anchor => "anchor",
            ResourceKind::Comment => "comment",
            ResourceKind::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anchor" => Some(ResourceKind::Anchor),
            "comment" => Some(ResourceKind::Comment),
            "user" => Some(ResourceKind::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Uuid,
}

/// An immutable notification addressed to exactly one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub resource: ResourceRef,
    #[serde(default)]
    pub anchor_id: Option<Uuid>,
    pub preview: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
