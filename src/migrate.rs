use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const TABLES: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE COLLATE NOCASE,
            display_name TEXT NOT NULL,
            avatar_url TEXT,
            follower_count INTEGER NOT NULL DEFAULT 0,
            following_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "anchors",
        r#"
        CREATE TABLE IF NOT EXISTS anchors (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            tags_json TEXT NOT NULL DEFAULT '[]',
            visibility TEXT NOT NULL,
            like_count INTEGER NOT NULL DEFAULT 0,
            clone_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            item_count INTEGER NOT NULL DEFAULT 0,
            engagement_score INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 0,
            cloned_from TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_item_added_at INTEGER NOT NULL,
            deleted_at INTEGER
        )
        "#,
    ),
    (
        "anchor_tags",
        r#"
        CREATE TABLE IF NOT EXISTS anchor_tags (
            anchor_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (anchor_id, tag)
        )
        "#,
    ),
    (
        "items",
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            anchor_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            title TEXT,
            content_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "follows",
        r#"
        CREATE TABLE IF NOT EXISTS follows (
            follower_id TEXT NOT NULL,
            followee_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (follower_id, followee_id)
        )
        "#,
    ),
    (
        "anchor_follows",
        r#"
        CREATE TABLE IF NOT EXISTS anchor_follows (
            user_id TEXT NOT NULL,
            anchor_id TEXT NOT NULL,
            notify_on_update INTEGER NOT NULL DEFAULT 1,
            last_seen_version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, anchor_id)
        )
        "#,
    ),
    (
        "likes",
        r#"
        CREATE TABLE IF NOT EXISTS likes (
            user_id TEXT NOT NULL,
            anchor_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, anchor_id)
        )
        "#,
    ),
    (
        "clones",
        r#"
        CREATE TABLE IF NOT EXISTS clones (
            user_id TEXT NOT NULL,
            source_anchor_id TEXT NOT NULL,
            clone_anchor_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, source_anchor_id)
        )
        "#,
    ),
    (
        "notifications",
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            type TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            anchor_id TEXT,
            preview TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_anchors_owner ON anchors(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_anchors_activity ON anchors(last_item_added_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_anchors_created ON anchors(created_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_anchors_score ON anchors(engagement_score DESC, created_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_anchor_tags_tag ON anchor_tags(tag)",
    "CREATE INDEX IF NOT EXISTS idx_items_anchor ON items(anchor_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_likes_anchor ON likes(anchor_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_anchor_follows_anchor ON anchor_follows(anchor_id)",
    "CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, created_at DESC)",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for (name, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create table {}", name))?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
