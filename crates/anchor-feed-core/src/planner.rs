//! Feed query planner.
//!
//! Turns a feed request (variant, viewer, raw query parameters) into a
//! [`FeedPlan`]: a bounded [`ContentQuery`] plus everything needed to
//! classify an empty page afterwards.
//!
//! Parameter validation (limit, cursor, category, sort) always happens
//! before the planner touches a collaborator, so malformed requests never
//! reach the store.
//!
//! | Variant | Filter | Sort |
//! |---------|--------|------|
//! | home | public + unlisted, owner ∈ followed (∪ viewer) | last item added, id |
//! | discover | public, owner ∉ followed ∪ viewer, optional tag | by category |
//! | tag | public, tag | popular (score) or recent |

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cursor::{self, FeedCursor};
use crate::error::FeedError;
use crate::models::Visibility;
use crate::query::{ContentFilter, ContentQuery, FeedSort, SeekPredicate};
use crate::store::{ContentReader, SocialGraphReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedVariant {
    Home,
    Discover,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverCategory {
    Trending,
    Popular,
    Recent,
}

impl DiscoverCategory {
    pub fn parse(s: &str) -> Result<Self, FeedError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trending" => Ok(DiscoverCategory::Trending),
            "popular" => Ok(DiscoverCategory::Popular),
            "recent" => Ok(DiscoverCategory::Recent),
            _ => Err(FeedError::InvalidCategory(s.to_string())),
        }
    }

    fn sort(&self) -> FeedSort {
        match self {
            DiscoverCategory::Trending | DiscoverCategory::Popular => FeedSort::Score,
            DiscoverCategory::Recent => FeedSort::Newest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSort {
    Popular,
    Recent,
}

impl TagSort {
    pub fn parse(s: &str) -> Result<Self, FeedError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "popular" => Ok(TagSort::Popular),
            "recent" => Ok(TagSort::Recent),
            _ => Err(FeedError::InvalidSort(s.to_string())),
        }
    }
}

/// Machine-readable explanation for an empty page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmptyReason {
    NoFollowing,
    NoContent,
    EndOfFeed,
    NoTagContent,
    FollowingAll,
}

/// Raw query parameters as they arrive from the route layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub category: Option<String>,
    pub sort: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub include_own: bool,
}

/// Upper bound for any configured page size.
pub const MAX_PAGE_LIMIT: i64 = 50;

/// Tuning knobs, decoupled from application config.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub default_limit: i64,
    pub max_limit: i64,
    pub trending_window: Duration,
    /// Recent likers fetched per item for like-summary prioritization.
    pub like_summary_fetch: usize,
    /// Likers shown per item.
    pub like_summary_display: usize,
    pub preview_items: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: MAX_PAGE_LIMIT,
            trending_window: Duration::hours(48),
            like_summary_fetch: 20,
            like_summary_display: 3,
            preview_items: 3,
        }
    }
}

/// A planned feed read.
#[derive(Debug, Clone)]
pub struct FeedPlan {
    pub variant: FeedVariant,
    pub viewer: Option<Uuid>,
    /// Page size requested by the client; the query asks for one more row.
    pub limit: usize,
    pub query: ContentQuery,
    pub cursor: Option<FeedCursor>,
    pub category: Option<DiscoverCategory>,
    pub tag_sort: Option<TagSort>,
    pub tag: Option<String>,
    /// Owners left out of the discovery feed, kept for the empty-state probe.
    pub excluded_owners: Vec<Uuid>,
    /// Set when the plan is known to be empty without reading content.
    pub short_circuit: Option<EmptyReason>,
    pub following_count: usize,
}

impl FeedPlan {
    pub fn sort(&self) -> FeedSort {
        self.query.sort
    }
}

/// Validated, variant-independent request parts.
struct Common {
    limit: usize,
    cursor: Option<FeedCursor>,
}

pub struct FeedPlanner {
    content: Arc<dyn ContentReader>,
    graph: Arc<dyn SocialGraphReader>,
    settings: FeedSettings,
}

impl FeedPlanner {
    pub fn new(
        content: Arc<dyn ContentReader>,
        graph: Arc<dyn SocialGraphReader>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            content,
            graph,
            settings,
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    fn validate(&self, params: &FeedParams, sort: FeedSort) -> Result<Common, FeedError> {
        let limit = params.limit.unwrap_or(self.settings.default_limit);
        if limit < 1 || limit > self.settings.max_limit {
            return Err(FeedError::InvalidLimit {
                got: limit,
                max: self.settings.max_limit,
            });
        }

        let cursor = match params.cursor.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => {
                Some(cursor::decode(token, sort.cursor_shape())?)
            }
            _ => None,
        };

        Ok(Common {
            limit: limit as usize,
            cursor,
        })
    }

    fn normalize_tag(raw: Option<&str>) -> Option<String> {
        raw.map(|t| t.trim().trim_start_matches('#').to_lowercase())
            .filter(|t| !t.is_empty())
    }

    /// Content from followed users, newest activity first.
    pub async fn plan_home(
        &self,
        viewer: Option<Uuid>,
        params: &FeedParams,
    ) -> Result<FeedPlan, FeedError> {
        let sort = FeedSort::RecentActivity;
        let common = self.validate(params, sort)?;
        let viewer_id = viewer.ok_or(FeedError::Unauthenticated)?;

        let following = self.graph.get_following_ids(viewer_id).await?;
        let following_count = following.len();
        let mut sources = following;
        if params.include_own && !sources.contains(&viewer_id) {
            sources.push(viewer_id);
        }

        let short_circuit = if sources.is_empty() {
            Some(EmptyReason::NoFollowing)
        } else {
            None
        };

        let filter = ContentFilter {
            visibilities: vec![Visibility::Public, Visibility::Unlisted],
            owner_in: Some(sources),
            ..Default::default()
        };

        debug!(
            viewer = %viewer_id,
            following = following_count,
            include_own = params.include_own,
            "planned home feed"
        );

        Ok(FeedPlan {
            variant: FeedVariant::Home,
            viewer,
            limit: common.limit,
            query: Self::bounded(filter, sort, common.cursor.as_ref(), common.limit),
            cursor: common.cursor,
            category: None,
            tag_sort: None,
            tag: None,
            excluded_owners: Vec::new(),
            short_circuit,
            following_count,
        })
    }

    /// Public content from people the viewer does not follow yet.
    pub async fn plan_discover(
        &self,
        viewer: Option<Uuid>,
        params: &FeedParams,
        now: DateTime<Utc>,
    ) -> Result<FeedPlan, FeedError> {
        let category = match params.category.as_deref() {
            Some(c) if !c.trim().is_empty() => DiscoverCategory::parse(c)?,
            _ => DiscoverCategory::Trending,
        };
        let sort = category.sort();
        let common = self.validate(params, sort)?;
        let tag = Self::normalize_tag(params.tag.as_deref());

        let mut excluded = match viewer {
            Some(v) => self.graph.get_following_ids(v).await?,
            None => Vec::new(),
        };
        let following_count = excluded.len();
        if let Some(v) = viewer {
            excluded.push(v);
        }

        let created_since = match category {
            DiscoverCategory::Trending => Some(now - self.settings.trending_window),
            DiscoverCategory::Popular | DiscoverCategory::Recent => None,
        };

        let filter = ContentFilter {
            visibilities: vec![Visibility::Public],
            owner_not_in: excluded.clone(),
            tag: tag.clone(),
            created_since,
            ..Default::default()
        };

        debug!(
            viewer = ?viewer,
            category = ?category,
            tag = ?tag,
            excluded = excluded.len(),
            "planned discovery feed"
        );

        Ok(FeedPlan {
            variant: FeedVariant::Discover,
            viewer,
            limit: common.limit,
            query: Self::bounded(filter, sort, common.cursor.as_ref(), common.limit),
            cursor: common.cursor,
            category: Some(category),
            tag_sort: None,
            tag,
            excluded_owners: excluded,
            short_circuit: None,
            following_count,
        })
    }

    /// All public content carrying one tag.
    pub fn plan_tag(
        &self,
        viewer: Option<Uuid>,
        tag: &str,
        params: &FeedParams,
    ) -> Result<FeedPlan, FeedError> {
        let tag_sort = match params.sort.as_deref() {
            Some(s) if !s.trim().is_empty() => TagSort::parse(s)?,
            _ => TagSort::Popular,
        };
        let sort = match tag_sort {
            TagSort::Popular => FeedSort::Score,
            TagSort::Recent => FeedSort::Newest,
        };
        let common = self.validate(params, sort)?;
        let tag = Self::normalize_tag(Some(tag)).ok_or_else(|| FeedError::InvalidParameter {
            field: "tag",
            message: "must not be empty".to_string(),
        })?;

        let filter = ContentFilter {
            visibilities: vec![Visibility::Public],
            tag: Some(tag.clone()),
            ..Default::default()
        };

        Ok(FeedPlan {
            variant: FeedVariant::Tag,
            viewer,
            limit: common.limit,
            query: Self::bounded(filter, sort, common.cursor.as_ref(), common.limit),
            cursor: common.cursor,
            category: None,
            tag_sort: Some(tag_sort),
            tag: Some(tag),
            excluded_owners: Vec::new(),
            short_circuit: None,
            following_count: 0,
        })
    }

    /// `limit + 1` rows so the caller can detect a further page.
    fn bounded(
        filter: ContentFilter,
        sort: FeedSort,
        cursor: Option<&FeedCursor>,
        limit: usize,
    ) -> ContentQuery {
        ContentQuery {
            filter,
            sort,
            seek: cursor.map(|c| SeekPredicate::after(sort, c)),
            limit: limit + 1,
        }
    }

    /// Explain why a planned read produced no rows.
    pub async fn classify_empty(&self, plan: &FeedPlan) -> EmptyReason {
        if let Some(reason) = plan.short_circuit {
            return reason;
        }
        match plan.variant {
            FeedVariant::Home => {
                if plan.cursor.is_some() {
                    EmptyReason::EndOfFeed
                } else {
                    EmptyReason::NoContent
                }
            }
            FeedVariant::Tag => {
                if plan.cursor.is_some() {
                    EmptyReason::EndOfFeed
                } else {
                    EmptyReason::NoTagContent
                }
            }
            FeedVariant::Discover => {
                if plan.tag.is_some() {
                    return EmptyReason::NoTagContent;
                }
                if plan.cursor.is_some() {
                    return EmptyReason::EndOfFeed;
                }
                if plan.excluded_owners.is_empty() {
                    return EmptyReason::NoContent;
                }
                self.probe_excluded(plan).await
            }
        }
    }

    /// Does anything match once followed owners are let back in?
    async fn probe_excluded(&self, plan: &FeedPlan) -> EmptyReason {
        let probe = ContentQuery {
            filter: ContentFilter {
                owner_not_in: Vec::new(),
                ..plan.query.filter.clone()
            },
            sort: plan.query.sort,
            seek: None,
            limit: 1,
        };
        match self.content.query(&probe).await {
            Ok(rows) if !rows.is_empty() => EmptyReason::FollowingAll,
            Ok(_) => EmptyReason::NoContent,
            Err(e) => {
                warn!(error = %e, "discovery empty-state probe failed");
                EmptyReason::NoContent
            }
        }
    }
}
