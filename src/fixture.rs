//! Bulk loading of users, anchors, items, and edges from a JSON file.
//!
//! Used by `anchors load` for demos and by the integration tests. Counters
//! are not taken from the file: after inserting every row the loader
//! recounts them from the edge tables and recomputes every score, so a
//! fixture only has to describe who did what.
//!
//! ```json
//! {
//!   "users":   [{ "id": "…", "username": "ada" }],
//!   "anchors": [{ "id": "…", "ownerId": "…", "title": "Reading", "tags": ["rust"] }],
//!   "items":   [{ "anchorId": "…", "position": 0, "content": { "type": "text", "body": "hi" } }],
//!   "follows": [{ "follower": "…", "followee": "…" }],
//!   "likes":   [{ "user": "…", "anchor": "…" }]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use anchor_feed_core::models::{Anchor, Item, ItemContent, UserProfile, Visibility};
use anchor_feed_core::score;
use anchor_feed_core::store::{ContentReader, EdgeWriter};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub anchors: Vec<AnchorSeed>,
    #[serde(default)]
    pub items: Vec<ItemSeed>,
    #[serde(default)]
    pub follows: Vec<FollowSeed>,
    #[serde(default)]
    pub anchor_follows: Vec<AnchorFollowSeed>,
    #[serde(default)]
    pub likes: Vec<EdgeSeed>,
    #[serde(default)]
    pub clones: Vec<CloneSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSeed {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorSeed {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub cloned_from: Option<Uuid>,
    /// Absolute creation time; wins over `created_hours_ago`.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Creation time relative to load time, so demo data stays "trending".
    #[serde(default)]
    pub created_hours_ago: Option<i64>,
    #[serde(default)]
    pub last_item_added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSeed {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub anchor_id: Uuid,
    pub position: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub content: ItemContent,
}

#[derive(Debug, Deserialize)]
pub struct FollowSeed {
    pub follower: Uuid,
    pub followee: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorFollowSeed {
    pub user: Uuid,
    pub anchor: Uuid,
    #[serde(default = "default_notify")]
    pub notify_on_update: bool,
    #[serde(default)]
    pub last_seen_version: i64,
}

fn default_notify() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct EdgeSeed {
    pub user: Uuid,
    pub anchor: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CloneSeed {
    pub user: Uuid,
    pub source: Uuid,
    pub clone: Uuid,
}

/// Row counts written by [`load`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub users: usize,
    pub anchors: usize,
    pub items: usize,
    pub edges: usize,
}

pub fn read_fixture(path: &Path) -> Result<Fixture> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fixture: {}", path.display()))
}

impl AnchorSeed {
    fn to_anchor(&self, now: DateTime<Utc>) -> Anchor {
        let created_at = self
            .created_at
            .or_else(|| self.created_hours_ago.map(|h| now - Duration::hours(h)))
            .unwrap_or(now);
        let mut anchor = Anchor::new(self.owner_id, self.title.clone(), self.visibility);
        anchor.id = self.id;
        anchor.description = self.description.clone();
        anchor.tags = self.tags.iter().map(|t| t.to_lowercase()).collect();
        anchor.comment_count = self.comment_count.max(0);
        anchor.version = self.version;
        anchor.cloned_from = self.cloned_from;
        anchor.created_at = created_at;
        anchor.updated_at = created_at;
        anchor.last_item_added_at = self.last_item_added_at.unwrap_or(created_at);
        anchor.deleted_at = self.deleted.then_some(now);
        anchor
    }
}

/// Insert every row of `fixture`, then recount counters and scores.
pub async fn load(store: &SqliteStore, fixture: &Fixture) -> Result<LoadStats> {
    let now = Utc::now();
    let mut stats = LoadStats::default();

    for seed in &fixture.users {
        store
            .insert_user(&UserProfile {
                id: seed.id,
                username: seed.username.clone(),
                display_name: seed
                    .display_name
                    .clone()
                    .unwrap_or_else(|| seed.username.clone()),
                avatar_url: seed.avatar_url.clone(),
                follower_count: 0,
                following_count: 0,
            })
            .await?;
        stats.users += 1;
    }

    for seed in &fixture.anchors {
        store.insert_anchor(&seed.to_anchor(now)).await?;
        stats.anchors += 1;
    }

    for seed in &fixture.items {
        store
            .insert_item(&Item {
                id: seed.id.unwrap_or_else(Uuid::new_v4),
                anchor_id: seed.anchor_id,
                position: seed.position,
                title: seed.title.clone(),
                content: seed.content.clone(),
                created_at: now,
            })
            .await?;
        stats.items += 1;
    }

    for f in &fixture.follows {
        if store.insert_follow(f.follower, f.followee).await? {
            stats.edges += 1;
        }
    }
    for f in &fixture.anchor_follows {
        store
            .upsert_anchor_follow(f.user, f.anchor, f.notify_on_update, f.last_seen_version)
            .await?;
        stats.edges += 1;
    }
    for l in &fixture.likes {
        if store.insert_like(l.user, l.anchor).await? {
            stats.edges += 1;
        }
    }
    for c in &fixture.clones {
        if store.insert_clone(c.user, c.source, c.clone).await? {
            stats.edges += 1;
        }
    }

    store.sync_counters().await?;
    recompute_all_scores(store).await?;

    info!(
        users = stats.users,
        anchors = stats.anchors,
        items = stats.items,
        edges = stats.edges,
        "fixture loaded"
    );
    Ok(stats)
}

pub async fn run_load(config: &Config, path: &Path) -> Result<()> {
    let fixture = read_fixture(path)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = load(&store, &fixture).await?;
    pool.close().await;
    println!(
        "Loaded {} users, {} anchors, {} items, {} edges.",
        stats.users, stats.anchors, stats.items, stats.edges
    );
    Ok(())
}

pub async fn run_recompute_scores(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.sync_counters().await?;
    let count = recompute_all_scores(&store).await?;
    pool.close().await;
    println!("Recomputed scores for {} anchors.", count);
    Ok(())
}

/// Re-apply the score formula to every anchor. Returns how many were visited.
pub async fn recompute_all_scores(store: &SqliteStore) -> Result<usize> {
    let ids = store.list_anchor_ids().await?;
    for id in &ids {
        score::recompute(store, *id).await?;
    }
    Ok(ids.len())
}
