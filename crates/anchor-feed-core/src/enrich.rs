//! Enrichment pipeline.
//!
//! Given one page of anchors and an optional viewer, resolve everything a
//! client needs to render the page:
//!
//! 1. **Authors**: one identity batch for all distinct owners and the
//!    candidate likers for like summaries. Unresolvable owners render as a
//!    placeholder author; unresolvable likers are skipped in favor of the
//!    next candidate.
//! 2. **Viewer engagement**: batched liked-set, cloned-set and anchor
//!    watermark lookups.
//! 3. **Like summaries**: up to `like_summary_fetch` recent likers per
//!    anchor, reordered so likers the viewer follows come first
//!    ([`prioritize_likers`]).
//! 4. **Previews**: the first `preview_items` sub-items projected through
//!    [`extract_preview`].
//!
//! Every step degrades to an empty value on failure. A page is never lost
//! because an enrichment read failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::models::{truncate_chars, Anchor, Item, ItemContent, ItemKind, UserProfile, Visibility};
use crate::planner::FeedSettings;
use crate::store::{ContentReader, EngagementReader, IdentityReader, SocialGraphReader};

/// Maximum characters of a link title shown in a preview.
pub const URL_TITLE_MAX_CHARS: usize = 50;
/// Maximum characters of a text body shown in a preview.
pub const TEXT_PREVIEW_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_deleted: bool,
}

impl AuthorSummary {
    /// Stand-in for an owner whose profile no longer resolves.
    pub fn deleted(id: Uuid) -> Self {
        Self {
            id,
            username: "deleted".to_string(),
            display_name: "Deleted user".to_string(),
            avatar_url: None,
            is_deleted: true,
        }
    }
}

impl From<&UserProfile> for AuthorSummary {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            is_deleted: false,
        }
    }
}

/// Viewer-relative flags. All `false` for anonymous viewers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerEngagement {
    pub has_liked: bool,
    pub has_cloned: bool,
    pub is_owner: bool,
    pub has_unseen_updates: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeSummary {
    pub users: Vec<AuthorSummary>,
    pub other_likers_count: i64,
}

/// Per-kind projection of a sub-item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPreview {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One rendered feed entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub author: AuthorSummary,
    pub like_count: i64,
    pub clone_count: i64,
    pub comment_count: i64,
    pub item_count: i64,
    pub engagement_score: i64,
    pub version: i64,
    pub cloned_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_item_added_at: DateTime<Utc>,
    #[serde(flatten)]
    pub viewer: ViewerEngagement,
    pub like_summary: LikeSummary,
    pub preview: Vec<ItemPreview>,
}

/// Order recent likers so followed likers come first, then take `take`.
///
/// `recent` is newest-first. The partition is stable, so recency order is
/// kept inside each half; when the viewer follows none of them the result
/// is simply the `take` most recent.
pub fn prioritize_likers<F>(recent: &[Uuid], is_followed: F, take: usize) -> Vec<Uuid>
where
    F: Fn(&Uuid) -> bool,
{
    let (followed, others): (Vec<Uuid>, Vec<Uuid>) =
        recent.iter().copied().partition(|id| is_followed(id));
    followed.into_iter().chain(others).take(take).collect()
}

/// Project a sub-item into its preview.
pub fn extract_preview(item: &Item) -> ItemPreview {
    let kind = item.content.kind();
    let (title, thumbnail_url, text) = match &item.content {
        ItemContent::Url {
            title,
            favicon_url,
            thumbnail_url,
            ..
        } => (
            title
                .as_deref()
                .or(item.title.as_deref())
                .map(|t| truncate_chars(t, URL_TITLE_MAX_CHARS)),
            thumbnail_url.clone().or_else(|| favicon_url.clone()),
            None,
        ),
        ItemContent::Image { url, thumbnail_url } => (
            item.title.clone(),
            Some(thumbnail_url.clone().unwrap_or_else(|| url.clone())),
            None,
        ),
        ItemContent::Text { body } => (
            item.title.clone(),
            None,
            Some(truncate_chars(body, TEXT_PREVIEW_MAX_CHARS)),
        ),
        ItemContent::Audio { .. } => (item.title.clone(), None, None),
        ItemContent::File { filename, .. } => (
            item.title.clone().or_else(|| Some(filename.clone())),
            None,
            None,
        ),
    };

    ItemPreview {
        id: item.id,
        kind,
        title,
        thumbnail_url,
        text,
    }
}

/// Unwrap an enrichment read, logging and defaulting on failure.
fn degrade<T: Default>(step: &str, result: anyhow::Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            warn!(step, error = %e, "enrichment step failed; using empty value");
            T::default()
        }
    }
}

pub struct Enricher {
    content: Arc<dyn ContentReader>,
    graph: Arc<dyn SocialGraphReader>,
    identity: Arc<dyn IdentityReader>,
    engagement: Arc<dyn EngagementReader>,
    like_summary_fetch: usize,
    like_summary_display: usize,
    preview_items: usize,
}

impl Enricher {
    pub fn new(
        content: Arc<dyn ContentReader>,
        graph: Arc<dyn SocialGraphReader>,
        identity: Arc<dyn IdentityReader>,
        engagement: Arc<dyn EngagementReader>,
        settings: &FeedSettings,
    ) -> Self {
        Self {
            content,
            graph,
            identity,
            engagement,
            like_summary_fetch: settings.like_summary_fetch,
            like_summary_display: settings.like_summary_display,
            preview_items: settings.preview_items,
        }
    }

    /// Enrich one page. Output order matches `anchors`.
    pub async fn enrich(&self, anchors: Vec<Anchor>, viewer: Option<Uuid>) -> Vec<FeedItem> {
        if anchors.is_empty() {
            return Vec::new();
        }
        let ids: Vec<Uuid> = anchors.iter().map(|a| a.id).collect();

        let (liked, cloned, watermarks) = match viewer {
            Some(v) => (
                degrade("liked", self.engagement.get_liked_anchor_ids(v, &ids).await),
                degrade("cloned", self.engagement.get_cloned_anchor_ids(v, &ids).await),
                degrade("watermarks", self.graph.get_anchor_watermarks(v, &ids).await),
            ),
            None => (HashSet::new(), HashSet::new(), HashMap::new()),
        };

        let ranked_likers = self.rank_likers(&anchors, viewer).await;

        let mut user_ids: Vec<Uuid> = anchors.iter().map(|a| a.owner_id).collect();
        user_ids.extend(ranked_likers.values().flatten().copied());
        user_ids.sort();
        user_ids.dedup();
        let profiles: HashMap<Uuid, AuthorSummary> =
            degrade("authors", self.identity.get_users_by_ids(&user_ids).await)
                .iter()
                .map(|u| (u.id, AuthorSummary::from(u)))
                .collect();

        let mut previews = if self.preview_items > 0 {
            degrade(
                "previews",
                self.content.get_preview_items(&ids, self.preview_items).await,
            )
        } else {
            HashMap::new()
        };

        anchors
            .into_iter()
            .map(|anchor| {
                let author = profiles
                    .get(&anchor.owner_id)
                    .cloned()
                    .unwrap_or_else(|| AuthorSummary::deleted(anchor.owner_id));

                // Likers whose profile is gone give their slot to the next
                // ranked liker.
                let users: Vec<AuthorSummary> = ranked_likers
                    .get(&anchor.id)
                    .map(|likers| {
                        likers
                            .iter()
                            .filter_map(|id| profiles.get(id).cloned())
                            .take(self.like_summary_display)
                            .collect()
                    })
                    .unwrap_or_default();
                let other_likers_count = (anchor.like_count - users.len() as i64).max(0);

                let viewer_flags = ViewerEngagement {
                    has_liked: liked.contains(&anchor.id),
                    has_cloned: cloned.contains(&anchor.id),
                    is_owner: viewer == Some(anchor.owner_id),
                    has_unseen_updates: watermarks
                        .get(&anchor.id)
                        .map_or(false, |seen| anchor.version > *seen),
                };

                let preview = previews
                    .remove(&anchor.id)
                    .unwrap_or_default()
                    .iter()
                    .map(extract_preview)
                    .collect();

                FeedItem {
                    id: anchor.id,
                    title: anchor.title,
                    description: anchor.description,
                    tags: anchor.tags,
                    visibility: anchor.visibility,
                    author,
                    like_count: anchor.like_count.max(0),
                    clone_count: anchor.clone_count.max(0),
                    comment_count: anchor.comment_count.max(0),
                    item_count: anchor.item_count,
                    engagement_score: anchor.engagement_score,
                    version: anchor.version,
                    cloned_from: anchor.cloned_from,
                    created_at: anchor.created_at,
                    last_item_added_at: anchor.last_item_added_at,
                    viewer: viewer_flags,
                    like_summary: LikeSummary {
                        users,
                        other_likers_count,
                    },
                    preview,
                }
            })
            .collect()
    }

    /// Recent likers per anchor in display order, not yet capped. The cap
    /// applies after profile resolution.
    async fn rank_likers(
        &self,
        anchors: &[Anchor],
        viewer: Option<Uuid>,
    ) -> HashMap<Uuid, Vec<Uuid>> {
        let liked_ids: Vec<Uuid> = anchors
            .iter()
            .filter(|a| a.like_count > 0)
            .map(|a| a.id)
            .collect();
        if liked_ids.is_empty() || self.like_summary_display == 0 {
            return HashMap::new();
        }

        let recent = degrade(
            "recent_likers",
            self.engagement
                .get_recent_likers(&liked_ids, self.like_summary_fetch)
                .await,
        );

        let followed: HashMap<Uuid, bool> = match viewer {
            Some(v) => {
                let mut candidates: Vec<Uuid> = recent.values().flatten().copied().collect();
                candidates.sort();
                candidates.dedup();
                if candidates.is_empty() {
                    HashMap::new()
                } else {
                    degrade(
                        "following_status",
                        self.graph.get_following_status(v, &candidates).await,
                    )
                }
            }
            None => HashMap::new(),
        };

        recent
            .into_iter()
            .map(|(anchor_id, likers)| {
                let ranked = prioritize_likers(
                    &likers,
                    |id| followed.get(id).copied().unwrap_or(false),
                    likers.len(),
                );
                (anchor_id, ranked)
            })
            .collect()
    }
}
