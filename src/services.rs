//! Wiring: one SQLite store behind every collaborator trait, a worker pool
//! behind the task dispatcher, and the two engine services on top.

use std::sync::Arc;

use anyhow::Result;

use anchor_feed_core::notify::FanoutService;
use anchor_feed_core::tasks::EngineTaskHandler;
use anchor_feed_core::{EngagementService, FeedEngine};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;
use crate::worker::{PoolConfig, WorkerPool};

pub struct Services {
    pub store: Arc<SqliteStore>,
    pub feed: FeedEngine,
    pub engagement: EngagementService,
    pub workers: Arc<WorkerPool>,
}

impl Services {
    /// Connect to the configured database and start the worker pool.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self::with_store(Arc::new(SqliteStore::new(pool)), config))
    }

    /// Must be called inside a tokio runtime.
    pub fn with_store(store: Arc<SqliteStore>, config: &Config) -> Self {
        let fanout = FanoutService::new(store.clone(), store.clone(), store.clone());
        let handler = Arc::new(EngineTaskHandler::new(store.clone(), fanout));
        let workers = Arc::new(WorkerPool::start(
            PoolConfig::from(&config.workers),
            handler,
        ));

        let feed = FeedEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            config.feed.settings(),
        );
        let engagement = EngagementService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            workers.clone(),
        );

        Self {
            store,
            feed,
            engagement,
            workers,
        }
    }
}
