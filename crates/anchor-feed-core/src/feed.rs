//! Feed engine: one entry point per feed variant.
//!
//! ```text
//! plan ─▶ query (limit + 1) ─▶ hasMore / trim ─▶ next cursor ─▶ enrich ─▶ FeedResponse
//!                                   │
//!                          empty ─▶ classify
//! ```
//!
//! Validation and access failures are returned as [`FeedError`]; enrichment
//! failures never are.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::cursor;
use crate::enrich::{Enricher, FeedItem};
use crate::error::FeedError;
use crate::planner::{
    DiscoverCategory, EmptyReason, FeedParams, FeedPlan, FeedPlanner, FeedSettings, FeedVariant,
    TagSort,
};
use crate::store::{ContentReader, EngagementReader, IdentityReader, SocialGraphReader};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub limit: usize,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMeta {
    pub feed_type: FeedVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<DiscoverCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<TagSort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub empty_reason: Option<EmptyReason>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub pagination: Pagination,
    pub meta: FeedMeta,
}

pub struct FeedEngine {
    planner: FeedPlanner,
    content: Arc<dyn ContentReader>,
    enricher: Enricher,
}

impl FeedEngine {
    pub fn new(
        content: Arc<dyn ContentReader>,
        graph: Arc<dyn SocialGraphReader>,
        identity: Arc<dyn IdentityReader>,
        engagement: Arc<dyn EngagementReader>,
        settings: FeedSettings,
    ) -> Self {
        let enricher = Enricher::new(
            content.clone(),
            graph.clone(),
            identity,
            engagement,
            &settings,
        );
        Self {
            planner: FeedPlanner::new(content.clone(), graph, settings),
            content,
            enricher,
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        self.planner.settings()
    }

    pub async fn home(
        &self,
        viewer: Option<Uuid>,
        params: &FeedParams,
    ) -> Result<FeedResponse, FeedError> {
        let plan = self.planner.plan_home(viewer, params).await?;
        self.execute(plan).await
    }

    pub async fn discover(
        &self,
        viewer: Option<Uuid>,
        params: &FeedParams,
    ) -> Result<FeedResponse, FeedError> {
        let plan = self.planner.plan_discover(viewer, params, Utc::now()).await?;
        self.execute(plan).await
    }

    pub async fn tag(
        &self,
        viewer: Option<Uuid>,
        tag: &str,
        params: &FeedParams,
    ) -> Result<FeedResponse, FeedError> {
        let plan = self.planner.plan_tag(viewer, tag, params)?;
        self.execute(plan).await
    }

    async fn execute(&self, plan: FeedPlan) -> Result<FeedResponse, FeedError> {
        let mut rows = if plan.short_circuit.is_some() {
            Vec::new()
        } else {
            self.content.query(&plan.query).await?
        };

        let has_more = rows.len() > plan.limit;
        rows.truncate(plan.limit);
        let next_cursor = if has_more {
            rows.last()
                .map(|last| cursor::encode(&plan.sort().cursor_for(last)))
        } else {
            None
        };

        let empty_reason = if rows.is_empty() {
            Some(self.planner.classify_empty(&plan).await)
        } else {
            None
        };

        debug!(
            feed = ?plan.variant,
            rows = rows.len(),
            has_more,
            empty_reason = ?empty_reason,
            "feed page read"
        );

        let items = self.enricher.enrich(rows, plan.viewer).await;

        Ok(FeedResponse {
            pagination: Pagination {
                limit: plan.limit,
                has_more,
                next_cursor,
                item_count: items.len(),
            },
            meta: FeedMeta {
                feed_type: plan.variant,
                category: plan.category,
                sort: plan.tag_sort,
                tag: plan.tag,
                empty_reason,
                generated_at: Utc::now(),
            },
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::Duration;

    use crate::models::{Anchor, Visibility};
    use crate::store::memory::{test_user, FailPoint, InMemoryStore};

    fn engine(store: &Arc<InMemoryStore>) -> FeedEngine {
        FeedEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            FeedSettings::default(),
        )
    }

    fn anchor(owner: Uuid, minutes_ago: i64, score: i64, tags: &[&str]) -> Anchor {
        let mut a = Anchor::new(owner, format!("a{}", minutes_ago), Visibility::Public);
        a.created_at = Utc::now() - Duration::minutes(minutes_ago);
        a.last_item_added_at = a.created_at;
        a.engagement_score = score;
        a.tags = tags.iter().map(|t| t.to_string()).collect();
        a
    }

    fn params(limit: i64, cursor: Option<String>) -> FeedParams {
        FeedParams {
            limit: Some(limit),
            cursor,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_home_pagination_is_complete_and_disjoint() {
        let store = Arc::new(InMemoryStore::new());
        let viewer = Uuid::new_v4();
        let friend = Uuid::new_v4();
        store.add_follow(viewer, friend);

        // ties on last_item_added_at force the id tie-break
        let base = Utc::now();
        let mut expected = Vec::new();
        for i in 0..11 {
            let mut a = anchor(friend, 0, 0, &[]);
            a.last_item_added_at = base - Duration::minutes(i / 3);
            expected.push(a.clone());
            store.insert_anchor(a);
        }
        expected.sort_by(|a, b| crate::query::FeedSort::RecentActivity.compare(a, b));
        let expected: Vec<Uuid> = expected.iter().map(|a| a.id).collect();

        let e = engine(&store);
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = e.home(Some(viewer), &params(4, cursor.clone())).await.unwrap();
            seen.extend(page.items.iter().map(|i| i.id));
            if !page.pagination.has_more {
                assert!(page.pagination.next_cursor.is_none());
                break;
            }
            cursor = page.pagination.next_cursor;
        }
        assert_eq!(seen, expected);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 11);
    }

    #[tokio::test]
    async fn test_discover_score_pagination() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..7 {
            store.insert_anchor(anchor(Uuid::new_v4(), i, i % 3, &[]));
        }
        let e = engine(&store);
        let first = e.discover(None, &params(5, None)).await.unwrap();
        assert_eq!(first.items.len(), 5);
        assert!(first.pagination.has_more);
        let scores: Vec<i64> = first.items.iter().map(|i| i.engagement_score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));

        let second = e
            .discover(None, &params(5, first.pagination.next_cursor.clone()))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.pagination.has_more);
        assert_eq!(second.meta.category, Some(DiscoverCategory::Trending));
    }

    #[tokio::test]
    async fn test_home_empty_reasons() {
        let store = Arc::new(InMemoryStore::new());
        let viewer = Uuid::new_v4();
        let e = engine(&store);

        let page = e.home(Some(viewer), &FeedParams::default()).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::NoFollowing));

        let friend = Uuid::new_v4();
        store.add_follow(viewer, friend);
        let mut private = anchor(friend, 0, 0, &[]);
        private.visibility = Visibility::Private;
        store.insert_anchor(private);
        let page = e.home(Some(viewer), &FeedParams::default()).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::NoContent));

        let only = anchor(friend, 0, 0, &[]);
        store.insert_anchor(only.clone());
        let token = cursor::encode(&crate::query::FeedSort::RecentActivity.cursor_for(&only));
        let page = e.home(Some(viewer), &params(20, Some(token))).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::EndOfFeed));
        assert_eq!(page.pagination.item_count, 0);
    }

    #[tokio::test]
    async fn test_home_unlisted_included_but_not_in_discover() {
        let store = Arc::new(InMemoryStore::new());
        let viewer = Uuid::new_v4();
        let friend = Uuid::new_v4();
        store.add_follow(viewer, friend);
        let mut unlisted = anchor(friend, 0, 0, &[]);
        unlisted.visibility = Visibility::Unlisted;
        store.insert_anchor(unlisted.clone());

        let e = engine(&store);
        let home = e.home(Some(viewer), &FeedParams::default()).await.unwrap();
        assert_eq!(home.items.len(), 1);
        let discover = e.discover(None, &FeedParams::default()).await.unwrap();
        assert!(discover.items.is_empty());
    }

    #[tokio::test]
    async fn test_discover_empty_reasons() {
        let store = Arc::new(InMemoryStore::new());
        let viewer = Uuid::new_v4();
        let e = engine(&store);

        let tagged = FeedParams {
            tag: Some("rust".into()),
            ..Default::default()
        };
        let page = e.discover(Some(viewer), &tagged).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::NoTagContent));

        let page = e.discover(Some(viewer), &FeedParams::default()).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::NoContent));

        let friend = Uuid::new_v4();
        store.add_follow(viewer, friend);
        store.insert_anchor(anchor(friend, 0, 0, &[]));
        let page = e.discover(Some(viewer), &FeedParams::default()).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::FollowingAll));
    }

    #[tokio::test]
    async fn test_trending_window_excludes_old_content() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_anchor(anchor(Uuid::new_v4(), 60 * 72, 100, &[]));
        store.insert_anchor(anchor(Uuid::new_v4(), 10, 1, &[]));
        let e = engine(&store);

        let trending = e.discover(None, &FeedParams::default()).await.unwrap();
        assert_eq!(trending.items.len(), 1);

        let popular = FeedParams {
            category: Some("popular".into()),
            ..Default::default()
        };
        let popular = e.discover(None, &popular).await.unwrap();
        assert_eq!(popular.items.len(), 2);
        assert_eq!(popular.items[0].engagement_score, 100);
    }

    #[tokio::test]
    async fn test_tag_feed() {
        let store = Arc::new(InMemoryStore::new());
        let owner = test_user("owner");
        store.insert_user(owner.clone());
        store.insert_anchor(anchor(owner.id, 5, 1, &["rust"]));
        store.insert_anchor(anchor(owner.id, 1, 9, &["rust", "async"]));
        store.insert_anchor(anchor(owner.id, 3, 50, &["go"]));
        let e = engine(&store);

        let page = e.tag(None, "Rust", &FeedParams::default()).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].engagement_score, 9);
        assert_eq!(page.items[0].author.username, "owner");
        assert_eq!(page.meta.tag.as_deref(), Some("rust"));
        assert_eq!(page.meta.sort, Some(TagSort::Popular));

        let recent = FeedParams {
            sort: Some("recent".into()),
            ..Default::default()
        };
        let page = e.tag(None, "rust", &recent).await.unwrap();
        assert_eq!(page.items[0].engagement_score, 9);
        assert_eq!(page.items[1].engagement_score, 1);

        let page = e.tag(None, "zig", &FeedParams::default()).await.unwrap();
        assert_eq!(page.meta.empty_reason, Some(EmptyReason::NoTagContent));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_internal() {
        let store = Arc::new(InMemoryStore::new());
        store.fail(FailPoint::Query);
        let err = engine(&store)
            .discover(None, &FeedParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
    }

    #[tokio::test]
    async fn test_response_json_shape() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_anchor(anchor(Uuid::new_v4(), 0, 0, &[]));
        let page = engine(&store)
            .discover(None, &FeedParams::default())
            .await
            .unwrap();
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pagination"]["hasMore"], false);
        assert!(json["pagination"]["nextCursor"].is_null());
        assert_eq!(json["meta"]["feedType"], "discover");
        assert_eq!(json["meta"]["category"], "trending");
        assert!(json["meta"]["emptyReason"].is_null());
        assert_eq!(json["items"][0]["hasLiked"], false);
        assert!(json["items"][0]["likeSummary"]["users"].is_array());
    }
}
