//! TOML configuration.
//!
//! Every section except `[db]` and `[server]` is optional and falls back to
//! the defaults below. [`load_config`] rejects values the engine cannot run
//! with.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use anchor_feed_core::planner::{FeedSettings, MAX_PAGE_LIMIT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
    #[serde(default = "default_trending_window_hours")]
    pub trending_window_hours: i64,
    #[serde(default = "default_like_summary_fetch")]
    pub like_summary_fetch: usize,
    #[serde(default = "default_like_summary_display")]
    pub like_summary_display: usize,
    #[serde(default = "default_preview_items")]
    pub preview_items: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            trending_window_hours: default_trending_window_hours(),
            like_summary_fetch: default_like_summary_fetch(),
            like_summary_display: default_like_summary_display(),
            preview_items: default_preview_items(),
        }
    }
}

impl FeedConfig {
    pub fn settings(&self) -> FeedSettings {
        FeedSettings {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            trending_window: chrono::Duration::hours(self.trending_window_hours),
            like_summary_fetch: self.like_summary_fetch,
            like_summary_display: self.like_summary_display,
            preview_items: self.preview_items,
        }
    }
}

fn default_limit() -> i64 {
    20
}
fn default_max_limit() -> i64 {
    MAX_PAGE_LIMIT
}
fn default_trending_window_hours() -> i64 {
    48
}
fn default_like_summary_fetch() -> usize {
    20
}
fn default_like_summary_display() -> usize {
    3
}
fn default_preview_items() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}
fn default_queue_size() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let feed = &config.feed;
    if feed.max_limit < 1 || feed.max_limit > MAX_PAGE_LIMIT {
        anyhow::bail!(
            "feed.max_limit must be in [1, {}], got {}",
            MAX_PAGE_LIMIT,
            feed.max_limit
        );
    }
    if feed.default_limit < 1 || feed.default_limit > feed.max_limit {
        anyhow::bail!(
            "feed.default_limit must be in [1, {}], got {}",
            feed.max_limit,
            feed.default_limit
        );
    }
    if feed.trending_window_hours < 1 {
        anyhow::bail!("feed.trending_window_hours must be >= 1");
    }
    if feed.like_summary_fetch < feed.like_summary_display {
        anyhow::bail!("feed.like_summary_fetch must be >= feed.like_summary_display");
    }

    if config.workers.count == 0 {
        anyhow::bail!("workers.count must be > 0");
    }
    if config.workers.queue_size == 0 {
        anyhow::bail!("workers.queue_size must be > 0");
    }

    match config.log.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!(
            "Unknown log level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    Ok(())
}
