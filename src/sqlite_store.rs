//! SQLite-backed implementation of every collaborator trait.
//!
//! Each [`ContentQuery`] is translated into one `SELECT` built with
//! [`QueryBuilder`]; all values are bound, only column names (from a fixed
//! set) are interpolated. Timestamps are stored as integer milliseconds
//! since the Unix epoch, ids as hyphenated lowercase UUID text (whose
//! lexicographic order matches [`Uuid`]'s `Ord`, so id tie-breaks agree
//! with the in-memory store).

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use anchor_feed_core::models::{
    Anchor, Item, ItemContent, Notification, NotificationType, ResourceKind, ResourceRef,
    UserProfile, Visibility,
};
use anchor_feed_core::query::{Comparison, ContentQuery, SortValue};
use anchor_feed_core::score::{CLONE_WEIGHT, COMMENT_WEIGHT, LIKE_WEIGHT};
use anchor_feed_core::store::{
    ContentReader, Counter, CounterWriter, EdgeWriter, EngagementReader, IdentityReader,
    NotificationSink, SocialGraphReader,
};

const ANCHOR_COLUMNS: &str = "id, owner_id, title, description, tags_json, visibility, \
     like_count, clone_count, comment_count, item_count, engagement_score, version, \
     cloned_from, created_at, updated_at, last_item_added_at, deleted_at";

const USER_COLUMNS: &str = "id, username, display_name, avatar_url, follower_count, following_count";

/// SQLite implementation of the collaborator traits.
///
/// Wraps a [`SqlitePool`]; cloning the pool is cheap, so one store can be
/// shared behind an `Arc` by the feed engine, the engagement service, and
/// the background workers.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_user(&self, user: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, display_name, avatar_url,
                               follower_count, following_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(user.follower_count)
        .bind(user.following_count)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert user {}", user.username))?;
        Ok(())
    }

    pub async fn insert_anchor(&self, anchor: &Anchor) -> Result<()> {
        let tags: Vec<String> = anchor.tags.iter().map(|t| t.to_lowercase()).collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO anchors (id, owner_id, title, description, tags_json, visibility,
                                 like_count, clone_count, comment_count, item_count,
                                 engagement_score, version, cloned_from, created_at,
                                 updated_at, last_item_added_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                tags_json = excluded.tags_json,
                visibility = excluded.visibility,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at
            "#,
        )
        .bind(anchor.id.to_string())
        .bind(anchor.owner_id.to_string())
        .bind(&anchor.title)
        .bind(&anchor.description)
        .bind(serde_json::to_string(&tags)?)
        .bind(anchor.visibility.as_str())
        .bind(anchor.like_count)
        .bind(anchor.clone_count)
        .bind(anchor.comment_count)
        .bind(anchor.item_count)
        .bind(anchor.engagement_score)
        .bind(anchor.version)
        .bind(anchor.cloned_from.map(|id| id.to_string()))
        .bind(to_ms(anchor.created_at))
        .bind(to_ms(anchor.updated_at))
        .bind(to_ms(anchor.last_item_added_at))
        .bind(anchor.deleted_at.map(to_ms))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM anchor_tags WHERE anchor_id = ?")
            .bind(anchor.id.to_string())
            .execute(&mut *tx)
            .await?;
        for tag in &tags {
            sqlx::query("INSERT OR IGNORE INTO anchor_tags (anchor_id, tag) VALUES (?, ?)")
                .bind(anchor.id.to_string())
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_item(&self, item: &Item) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO items (id, anchor_id, position, title, content_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                position = excluded.position,
                title = excluded.title,
                content_json = excluded.content_json
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.anchor_id.to_string())
        .bind(item.position)
        .bind(&item.title)
        .bind(serde_json::to_string(&item.content)?)
        .bind(to_ms(item.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recount every denormalized counter from the edge tables.
    ///
    /// `comment_count` has no edge table here and is left as stored.
    pub async fn sync_counters(&self) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE anchors SET
                like_count = (SELECT COUNT(*) FROM likes WHERE likes.anchor_id = anchors.id),
                clone_count = (SELECT COUNT(*) FROM clones
                               WHERE clones.source_anchor_id = anchors.id),
                item_count = (SELECT COUNT(*) FROM items WHERE items.anchor_id = anchors.id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE users SET
                follower_count = (SELECT COUNT(*) FROM follows
                                  WHERE follows.followee_id = users.id),
                following_count = (SELECT COUNT(*) FROM follows
                                   WHERE follows.follower_id = users.id)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent notifications for `recipient_id`, newest first.
    pub async fn list_notifications(
        &self,
        recipient_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, recipient_id, actor_id, type, resource_type, resource_id,
                   anchor_id, preview, is_read, created_at
            FROM notifications
            WHERE recipient_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(recipient_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid id in database: {}", s))
}

fn id_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    parse_id(&row.try_get::<String, _>(column)?)
}

fn id_strings(ids: &[Uuid]) -> Vec<String> {
    ids.iter().map(Uuid::to_string).collect()
}

/// Append `(?, ?, ...)` binding each id.
fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[Uuid]) {
    qb.push("(");
    let mut sep = qb.separated(", ");
    for id in id_strings(ids) {
        sep.push_bind(id);
    }
    sep.push_unseparated(")");
}

fn row_to_anchor(row: &SqliteRow) -> Result<Anchor> {
    let visibility: String = row.try_get("visibility")?;
    let tags_json: String = row.try_get("tags_json")?;
    let cloned_from: Option<String> = row.try_get("cloned_from")?;
    let deleted_at: Option<i64> = row.try_get("deleted_at")?;

    Ok(Anchor {
        id: id_column(row, "id")?,
        owner_id: id_column(row, "owner_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        tags: serde_json::from_str(&tags_json).context("invalid tags_json")?,
        visibility: Visibility::parse(&visibility)
            .ok_or_else(|| anyhow!("unknown visibility '{}'", visibility))?,
        like_count: row.try_get("like_count")?,
        clone_count: row.try_get("clone_count")?,
        comment_count: row.try_get("comment_count")?,
        item_count: row.try_get("item_count")?,
        engagement_score: row.try_get("engagement_score")?,
        version: row.try_get("version")?,
        cloned_from: cloned_from.as_deref().map(parse_id).transpose()?,
        created_at: from_ms(row.try_get("created_at")?)?,
        updated_at: from_ms(row.try_get("updated_at")?)?,
        last_item_added_at: from_ms(row.try_get("last_item_added_at")?)?,
        deleted_at: deleted_at.map(from_ms).transpose()?,
    })
}

fn row_to_user(row: &SqliteRow) -> Result<UserProfile> {
    Ok(UserProfile {
        id: id_column(row, "id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        avatar_url: row.try_get("avatar_url")?,
        follower_count: row.try_get("follower_count")?,
        following_count: row.try_get("following_count")?,
    })
}

fn row_to_item(row: &SqliteRow) -> Result<Item> {
    let content_json: String = row.try_get("content_json")?;
    let content: ItemContent =
        serde_json::from_str(&content_json).context("invalid item content_json")?;
    Ok(Item {
        id: id_column(row, "id")?,
        anchor_id: id_column(row, "anchor_id")?,
        position: row.try_get("position")?,
        title: row.try_get("title")?,
        content,
        created_at: from_ms(row.try_get("created_at")?)?,
    })
}

fn row_to_notification(row: &SqliteRow) -> Result<Notification> {
    let kind: String = row.try_get("type")?;
    let resource_type: String = row.try_get("resource_type")?;
    let anchor_id: Option<String> = row.try_get("anchor_id")?;
    Ok(Notification {
        id: id_column(row, "id")?,
        recipient_id: id_column(row, "recipient_id")?,
        actor_id: id_column(row, "actor_id")?,
        kind: NotificationType::parse(&kind)
            .ok_or_else(|| anyhow!("unknown notification type '{}'", kind))?,
        resource: ResourceRef {
            kind: ResourceKind::parse(&resource_type)
                .ok_or_else(|| anyhow!("unknown resource type '{}'", resource_type))?,
            id: id_column(row, "resource_id")?,
        },
        anchor_id: anchor_id.as_deref().map(parse_id).transpose()?,
        preview: row.try_get("preview")?,
        is_read: row.try_get::<i64, _>("is_read")? != 0,
        created_at: from_ms(row.try_get("created_at")?)?,
    })
}

fn push_sort_value(qb: &mut QueryBuilder<'_, Sqlite>, value: SortValue) {
    match value {
        SortValue::Score(s) => qb.push_bind(s),
        SortValue::Timestamp(ts) => qb.push_bind(to_ms(ts)),
        SortValue::Id(id) => qb.push_bind(id.to_string()),
    };
}

/// Build the `SELECT` for a content query.
fn build_content_query(query: &ContentQuery) -> QueryBuilder<'static, Sqlite> {
    let filter = &query.filter;
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM anchors WHERE deleted_at IS NULL",
        ANCHOR_COLUMNS
    ));

    if !filter.visibilities.is_empty() {
        qb.push(" AND visibility IN (");
        let mut sep = qb.separated(", ");
        for v in &filter.visibilities {
            sep.push_bind(v.as_str());
        }
        sep.push_unseparated(")");
    }

    if let Some(owners) = &filter.owner_in {
        if owners.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(" AND owner_id IN ");
            push_id_list(&mut qb, owners);
        }
    }

    if !filter.owner_not_in.is_empty() {
        qb.push(" AND owner_id NOT IN ");
        push_id_list(&mut qb, &filter.owner_not_in);
    }

    if let Some(tag) = &filter.tag {
        qb.push(" AND id IN (SELECT anchor_id FROM anchor_tags WHERE tag = ");
        qb.push_bind(tag.to_lowercase());
        qb.push(")");
    }

    if let Some(since) = filter.created_since {
        qb.push(" AND created_at >= ");
        qb.push_bind(to_ms(since));
    }

    if let Some(seek) = &query.seek {
        qb.push(" AND (");
        for (i, clause) in seek.clauses.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("(");
            for (j, term) in clause.iter().enumerate() {
                if j > 0 {
                    qb.push(" AND ");
                }
                let op = match term.op {
                    Comparison::Eq => " = ",
                    Comparison::Lt => " < ",
                };
                qb.push(term.field.column());
                qb.push(op);
                push_sort_value(&mut qb, term.value);
            }
            qb.push(")");
        }
        qb.push(")");
    }

    let order: Vec<String> = query
        .sort
        .keys()
        .iter()
        .map(|k| format!("{} DESC", k.column()))
        .collect();
    qb.push(" ORDER BY ");
    qb.push(order.join(", "));
    qb.push(" LIMIT ");
    qb.push_bind(query.limit as i64);
    qb
}

#[async_trait]
impl ContentReader for SqliteStore {
    async fn query(&self, query: &ContentQuery) -> Result<Vec<Anchor>> {
        let mut qb = build_content_query(query);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_anchor).collect()
    }

    async fn get_anchor(&self, id: Uuid) -> Result<Option<Anchor>> {
        let row = sqlx::query(&format!("SELECT {} FROM anchors WHERE id = ?", ANCHOR_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_anchor).transpose()
    }

    async fn get_preview_items(
        &self,
        anchor_ids: &[Uuid],
        per_anchor: usize,
    ) -> Result<HashMap<Uuid, Vec<Item>>> {
        if anchor_ids.is_empty() || per_anchor == 0 {
            return Ok(HashMap::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT id, anchor_id, position, title, content_json, created_at FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY anchor_id ORDER BY position, id
                ) AS rn
                FROM items
                WHERE anchor_id IN "#,
        );
        push_id_list(&mut qb, anchor_ids);
        qb.push(") WHERE rn <= ");
        qb.push_bind(per_anchor as i64);
        qb.push(" ORDER BY anchor_id, rn");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut out: HashMap<Uuid, Vec<Item>> = HashMap::new();
        for row in &rows {
            let item = row_to_item(row)?;
            out.entry(item.anchor_id).or_default().push(item);
        }
        Ok(out)
    }

    async fn list_anchor_ids(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM anchors ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        ids.iter().map(|s| parse_id(s)).collect()
    }
}

#[async_trait]
impl SocialGraphReader for SqliteStore {
    async fn get_following_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT followee_id FROM follows WHERE follower_id = ? ORDER BY followee_id",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        ids.iter().map(|s| parse_id(s)).collect()
    }

    async fn get_following_status(
        &self,
        user_id: Uuid,
        candidate_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>> {
        if candidate_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT followee_id FROM follows WHERE follower_id = ");
        qb.push_bind(user_id.to_string());
        qb.push(" AND followee_id IN ");
        push_id_list(&mut qb, candidate_ids);

        let followed: HashSet<Uuid> = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|s| parse_id(s))
            .collect::<Result<_>>()?;

        Ok(candidate_ids
            .iter()
            .map(|id| (*id, followed.contains(id)))
            .collect())
    }

    async fn get_notification_enabled_followers(&self, anchor_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM anchor_follows
            WHERE anchor_id = ? AND notify_on_update = 1
            ORDER BY user_id
            "#,
        )
        .bind(anchor_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        ids.iter().map(|s| parse_id(s)).collect()
    }

    async fn get_anchor_watermarks(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>> {
        if anchor_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT anchor_id, last_seen_version FROM anchor_follows WHERE user_id = ",
        );
        qb.push_bind(user_id.to_string());
        qb.push(" AND anchor_id IN ");
        push_id_list(&mut qb, anchor_ids);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<(Uuid, i64)> {
                Ok((id_column(row, "anchor_id")?, row.try_get("last_seen_version")?))
            })
            .collect()
    }
}

#[async_trait]
impl IdentityReader for SqliteStore {
    async fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users WHERE id IN ", USER_COLUMNS));
        push_id_list(&mut qb, ids);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn get_users_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserProfile>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        // `username` is declared COLLATE NOCASE, so IN matches case-insensitively.
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM users WHERE username IN (",
            USER_COLUMNS
        ));
        let mut sep = qb.separated(", ");
        for name in usernames {
            sep.push_bind(name.clone());
        }
        sep.push_unseparated(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_user).collect()
    }
}

#[async_trait]
impl EngagementReader for SqliteStore {
    async fn get_liked_anchor_ids(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>> {
        if anchor_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT anchor_id FROM likes WHERE user_id = ");
        qb.push_bind(user_id.to_string());
        qb.push(" AND anchor_id IN ");
        push_id_list(&mut qb, anchor_ids);
        qb.build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|s| parse_id(s))
            .collect()
    }

    async fn get_cloned_anchor_ids(
        &self,
        user_id: Uuid,
        anchor_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>> {
        if anchor_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT source_anchor_id FROM clones WHERE user_id = ");
        qb.push_bind(user_id.to_string());
        qb.push(" AND source_anchor_id IN ");
        push_id_list(&mut qb, anchor_ids);
        qb.build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|s| parse_id(s))
            .collect()
    }

    async fn get_recent_likers(
        &self,
        anchor_ids: &[Uuid],
        per_anchor: usize,
    ) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        if anchor_ids.is_empty() || per_anchor == 0 {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT anchor_id, user_id FROM (
                SELECT anchor_id, user_id, ROW_NUMBER() OVER (
                    PARTITION BY anchor_id ORDER BY created_at DESC, rowid DESC
                ) AS rn
                FROM likes
                WHERE anchor_id IN "#,
        );
        push_id_list(&mut qb, anchor_ids);
        qb.push(") WHERE rn <= ");
        qb.push_bind(per_anchor as i64);
        qb.push(" ORDER BY anchor_id, rn");

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut out: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in &rows {
            out.entry(id_column(row, "anchor_id")?)
                .or_default()
                .push(id_column(row, "user_id")?);
        }
        Ok(out)
    }
}

#[async_trait]
impl EdgeWriter for SqliteStore {
    async fn insert_like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO likes (user_id, anchor_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(anchor_id.to_string())
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_like(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM likes WHERE user_id = ? AND anchor_id = ?")
            .bind(user_id.to_string())
            .bind(anchor_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(follower_id.to_string())
        .bind(followee_id.to_string())
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND followee_id = ?")
            .bind(follower_id.to_string())
            .bind(followee_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_anchor_follow(
        &self,
        user_id: Uuid,
        anchor_id: Uuid,
        notify_on_update: bool,
        seen_version: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO anchor_follows
                (user_id, anchor_id, notify_on_update, last_seen_version, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(anchor_id.to_string())
        .bind(notify_on_update)
        .bind(seen_version)
        .bind(to_ms(Utc::now()))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            sqlx::query(
                r#"
                UPDATE anchor_follows SET notify_on_update = ?, last_seen_version = ?
                WHERE user_id = ? AND anchor_id = ?
                "#,
            )
            .bind(notify_on_update)
            .bind(seen_version)
            .bind(user_id.to_string())
            .bind(anchor_id.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn delete_anchor_follow(&self, user_id: Uuid, anchor_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM anchor_follows WHERE user_id = ? AND anchor_id = ?")
            .bind(user_id.to_string())
            .bind(anchor_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_seen_version(&self, user_id: Uuid, anchor_id: Uuid, version: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE anchor_follows SET last_seen_version = ? WHERE user_id = ? AND anchor_id = ?",
        )
        .bind(version)
        .bind(user_id.to_string())
        .bind(anchor_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_clone(
        &self,
        user_id: Uuid,
        source_anchor_id: Uuid,
        clone_anchor_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO clones (user_id, source_anchor_id, clone_anchor_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(source_anchor_id.to_string())
        .bind(clone_anchor_id.to_string())
        .bind(to_ms(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CounterWriter for SqliteStore {
    async fn increment_counter(&self, counter: Counter, id: Uuid, delta: i64) -> Result<i64> {
        let (table, column) = counter.location();
        let value: Option<i64> = sqlx::query_scalar(&format!(
            "UPDATE {table} SET {column} = {column} + ? WHERE id = ? RETURNING {column}"
        ))
        .bind(delta)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match value {
            Some(v) => Ok(v),
            None => bail!("no row in {} for {}", table, id),
        }
    }

    async fn clamp_counter(&self, counter: Counter, id: Uuid) -> Result<()> {
        let (table, column) = counter.location();
        sqlx::query(&format!(
            "UPDATE {table} SET {column} = 0 WHERE id = ? AND {column} < 0"
        ))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recompute_engagement_score(&self, anchor_id: Uuid) -> Result<Option<i64>> {
        let score: Option<i64> = sqlx::query_scalar(&format!(
            r#"
            UPDATE anchors SET engagement_score =
                MAX(like_count, 0) * {LIKE_WEIGHT}
                + MAX(clone_count, 0) * {CLONE_WEIGHT}
                + MAX(comment_count, 0) * {COMMENT_WEIGHT}
            WHERE id = ?
            RETURNING engagement_score
            "#
        ))
        .bind(anchor_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(score)
    }

    async fn record_item_added(&self, anchor_id: Uuid, at: DateTime<Utc>) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE anchors SET
                version = version + 1,
                item_count = item_count + 1,
                last_item_added_at = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING version
            "#,
        )
        .bind(to_ms(at))
        .bind(to_ms(at))
        .bind(anchor_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        version.ok_or_else(|| anyhow!("anchor {} not found", anchor_id))
    }
}

#[async_trait]
impl NotificationSink for SqliteStore {
    async fn create_notifications(&self, notifications: &[Notification]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for n in notifications {
            sqlx::query(
                r#"
                INSERT INTO notifications (id, recipient_id, actor_id, type, resource_type,
                                           resource_id, anchor_id, preview, is_read, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(n.id.to_string())
            .bind(n.recipient_id.to_string())
            .bind(n.actor_id.to_string())
            .bind(n.kind.as_str())
            .bind(n.resource.kind.as_str())
            .bind(n.resource.id.to_string())
            .bind(n.anchor_id.map(|id| id.to_string()))
            .bind(&n.preview)
            .bind(n.is_read)
            .bind(to_ms(n.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_feed_core::cursor::FeedCursor;
    use anchor_feed_core::query::{ContentFilter, FeedSort, SeekPredicate};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(tmp.path().join("test.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn user(name: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            username: name.to_string(),
            display_name: name.to_string(),
            avatar_url: None,
            follower_count: 0,
            following_count: 0,
        }
    }

    fn anchor(owner: Uuid, minutes_ago: i64, score: i64) -> Anchor {
        let mut a = Anchor::new(owner, format!("a{}", minutes_ago), Visibility::Public);
        a.created_at = DateTime::from_timestamp_millis(to_ms(Utc::now() - Duration::minutes(minutes_ago)))
            .unwrap();
        a.updated_at = a.created_at;
        a.last_item_added_at = a.created_at;
        a.engagement_score = score;
        a
    }

    #[tokio::test]
    async fn test_anchor_round_trip() {
        let (_tmp, store) = store().await;
        let mut a = anchor(Uuid::new_v4(), 5, 7);
        a.tags = vec!["Rust".into(), "async".into()];
        a.visibility = Visibility::Unlisted;
        store.insert_anchor(&a).await.unwrap();

        let got = store.get_anchor(a.id).await.unwrap().unwrap();
        assert_eq!(got.tags, vec!["rust", "async"]);
        assert_eq!(got.visibility, Visibility::Unlisted);
        assert_eq!(got.created_at, a.created_at);
        assert_eq!(got.engagement_score, 7);
        assert!(store.get_anchor(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_seeks() {
        let (_tmp, store) = store().await;
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rows = Vec::new();
        for i in 0..6 {
            let a = anchor(if i % 2 == 0 { owner } else { other }, i, i % 3);
            store.insert_anchor(&a).await.unwrap();
            rows.push(a);
        }
        let mut deleted = anchor(owner, 1, 100);
        deleted.deleted_at = Some(Utc::now());
        store.insert_anchor(&deleted).await.unwrap();

        let query = ContentQuery {
            filter: ContentFilter {
                visibilities: vec![Visibility::Public],
                ..Default::default()
            },
            sort: FeedSort::Score,
            seek: None,
            limit: 10,
        };
        let got = store.query(&query).await.unwrap();
        rows.sort_by(|a, b| FeedSort::Score.compare(a, b));
        let expected: Vec<Uuid> = rows.iter().map(|a| a.id).collect();
        assert_eq!(got.iter().map(|a| a.id).collect::<Vec<_>>(), expected);

        let cursor: FeedCursor = FeedSort::Score.cursor_for(&rows[2]);
        let seek_query = ContentQuery {
            seek: Some(SeekPredicate::after(FeedSort::Score, &cursor)),
            ..query.clone()
        };
        let rest = store.query(&seek_query).await.unwrap();
        assert_eq!(rest.iter().map(|a| a.id).collect::<Vec<_>>(), expected[3..].to_vec());

        let owner_only = ContentQuery {
            filter: ContentFilter {
                owner_in: Some(vec![owner]),
                ..Default::default()
            },
            ..query.clone()
        };
        assert_eq!(store.query(&owner_only).await.unwrap().len(), 3);

        let nobody = ContentQuery {
            filter: ContentFilter {
                owner_in: Some(vec![]),
                ..Default::default()
            },
            ..query
        };
        assert!(store.query(&nobody).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_filter() {
        let (_tmp, store) = store().await;
        let mut a = anchor(Uuid::new_v4(), 0, 0);
        a.tags = vec!["rust".into()];
        store.insert_anchor(&a).await.unwrap();
        store.insert_anchor(&anchor(Uuid::new_v4(), 0, 0)).await.unwrap();

        let query = ContentQuery {
            filter: ContentFilter {
                tag: Some("RUST".into()),
                ..Default::default()
            },
            sort: FeedSort::Newest,
            seek: None,
            limit: 10,
        };
        let got = store.query(&query).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, a.id);
    }

    #[tokio::test]
    async fn test_edges_idempotent_and_counters_clamp() {
        let (_tmp, store) = store().await;
        let a = anchor(Uuid::new_v4(), 0, 0);
        store.insert_anchor(&a).await.unwrap();
        let u = Uuid::new_v4();

        assert!(store.insert_like(u, a.id).await.unwrap());
        assert!(!store.insert_like(u, a.id).await.unwrap());
        assert!(store.delete_like(u, a.id).await.unwrap());
        assert!(!store.delete_like(u, a.id).await.unwrap());

        assert_eq!(store.increment_counter(Counter::Likes, a.id, -1).await.unwrap(), -1);
        store.clamp_counter(Counter::Likes, a.id).await.unwrap();
        assert_eq!(store.get_anchor(a.id).await.unwrap().unwrap().like_count, 0);
        assert!(store
            .increment_counter(Counter::Likes, Uuid::new_v4(), 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_recompute_score_reads_counters_in_place() {
        let (_tmp, store) = store().await;
        let a = anchor(Uuid::new_v4(), 0, 99);
        store.insert_anchor(&a).await.unwrap();

        store.increment_counter(Counter::Likes, a.id, 2).await.unwrap();
        store.increment_counter(Counter::Clones, a.id, 1).await.unwrap();
        store.increment_counter(Counter::Comments, a.id, -1).await.unwrap();

        let score = store.recompute_engagement_score(a.id).await.unwrap();
        assert_eq!(score, Some(2 * 2 + 3));
        assert_eq!(store.get_anchor(a.id).await.unwrap().unwrap().engagement_score, 7);

        store.increment_counter(Counter::Likes, a.id, 1).await.unwrap();
        assert_eq!(store.recompute_engagement_score(a.id).await.unwrap(), Some(9));
        assert_eq!(
            store.recompute_engagement_score(Uuid::new_v4()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_anchor_follow_upsert_and_watermarks() {
        let (_tmp, store) = store().await;
        let (u, a) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(store.upsert_anchor_follow(u, a, true, 2).await.unwrap());
        assert!(!store.upsert_anchor_follow(u, a, false, 3).await.unwrap());
        assert!(store.get_notification_enabled_followers(a).await.unwrap().is_empty());

        let marks = store.get_anchor_watermarks(u, &[a, Uuid::new_v4()]).await.unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[&a], 3);

        assert!(store.set_seen_version(u, a, 5).await.unwrap());
        assert!(!store.set_seen_version(Uuid::new_v4(), a, 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_likers_and_previews() {
        let (_tmp, store) = store().await;
        let a = anchor(Uuid::new_v4(), 0, 0);
        store.insert_anchor(&a).await.unwrap();
        let likers: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for l in &likers {
            store.insert_like(*l, a.id).await.unwrap();
        }
        let recent = store.get_recent_likers(&[a.id], 3).await.unwrap();
        assert_eq!(recent[&a.id], vec![likers[4], likers[3], likers[2]]);

        for pos in (0..4).rev() {
            store
                .insert_item(&Item {
                    id: Uuid::new_v4(),
                    anchor_id: a.id,
                    position: pos,
                    title: None,
                    content: ItemContent::Text {
                        body: format!("p{}", pos),
                    },
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let previews = store.get_preview_items(&[a.id], 3).await.unwrap();
        let positions: Vec<i64> = previews[&a.id].iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_usernames_case_insensitive() {
        let (_tmp, store) = store().await;
        let alice = user("Alice");
        store.insert_user(&alice).await.unwrap();
        let found = store
            .get_users_by_usernames(&["alice".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, alice.id);
    }

    #[tokio::test]
    async fn test_notifications_round_trip() {
        let (_tmp, store) = store().await;
        let recipient = Uuid::new_v4();
        let n = Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            actor_id: Uuid::new_v4(),
            kind: NotificationType::AnchorUpdate,
            resource: ResourceRef {
                kind: ResourceKind::Anchor,
                id: Uuid::new_v4(),
            },
            anchor_id: None,
            preview: "x: y".into(),
            is_read: false,
            created_at: Utc::now(),
        };
        store.create_notifications(&[n.clone()]).await.unwrap();
        let got = store.list_notifications(recipient, 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, NotificationType::AnchorUpdate);
        assert_eq!(got[0].preview, "x: y");
    }
}
