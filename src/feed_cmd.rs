//! `anchors feed` and `anchors notifications`: print engine output as JSON.

use anyhow::{bail, Result};
use uuid::Uuid;

use anchor_feed_core::planner::FeedParams;
use anchor_feed_core::store::IdentityReader;

use crate::config::Config;
use crate::services::Services;
use crate::sqlite_store::SqliteStore;

/// Which feed to print.
#[derive(Debug, Clone)]
pub enum FeedKind {
    Home,
    Discover,
    Tag(String),
}

pub async fn run_feed(
    config: &Config,
    kind: FeedKind,
    viewer: Option<String>,
    params: FeedParams,
) -> Result<()> {
    let services = Services::open(config).await?;
    let viewer = match viewer {
        Some(v) => Some(resolve_user(&services.store, &v).await?),
        None => None,
    };

    let response = match &kind {
        FeedKind::Home => services.feed.home(viewer, &params).await,
        FeedKind::Discover => services.feed.discover(viewer, &params).await,
        FeedKind::Tag(tag) => services.feed.tag(viewer, tag, &params).await,
    };

    match response {
        Ok(page) => {
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }
        Err(e) => bail!("{}: {}", e.code(), e),
    }
}

pub async fn run_notifications(config: &Config, user: &str, limit: i64) -> Result<()> {
    let services = Services::open(config).await?;
    let recipient = resolve_user(&services.store, user).await?;
    let notifications = services.store.list_notifications(recipient, limit).await?;
    if notifications.is_empty() {
        println!("No notifications.");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&notifications)?);
    Ok(())
}

/// Accept either a user id or a username.
pub async fn resolve_user(store: &SqliteStore, user: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(user) {
        return Ok(id);
    }
    let name = user.trim_start_matches('@').to_string();
    match store.get_users_by_usernames(&[name]).await?.first() {
        Some(profile) => Ok(profile.id),
        None => bail!("Unknown user: {}", user),
    }
}
