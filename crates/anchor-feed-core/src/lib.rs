//! # Anchor Feed Core
//!
//! Shared, runtime-agnostic logic for Anchor Feed: data models, the cursor
//! codec, the feed query planner, the enrichment pipeline, the notification
//! fan-out rules, and the collaborator traits the engine reads and writes
//! through.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Storage and task
//! execution are injected through the traits in [`store`] and [`tasks`].
//!
//! ```text
//! request ─▶ planner ─▶ ContentReader::query ─▶ enrich ─▶ cursor ─▶ FeedResponse
//!                │                                  │
//!        SocialGraphReader              IdentityReader / EngagementReader
//!
//! mutation ─▶ TaskDispatcher ─▶ RecomputeScore | FanOut(EngagementEvent)
//! ```

pub mod cursor;
pub mod engagement;
pub mod enrich;
pub mod error;
pub mod feed;
pub mod models;
pub mod notify;
pub mod planner;
pub mod query;
pub mod score;
pub mod store;
pub mod tasks;

pub use engagement::EngagementService;
pub use error::{CursorError, FeedError};
pub use feed::{FeedEngine, FeedResponse};
