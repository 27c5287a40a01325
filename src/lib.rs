//! # Anchor Feed
//!
//! A social feed and engagement aggregation engine for anchors: user-owned,
//! ordered collections of links, images, notes, audio, and files.
//!
//! The engine logic (planning, cursors, enrichment, fan-out rules, scoring)
//! lives in the `anchor-feed-core` crate. This crate supplies the SQLite
//! store behind its collaborator traits, a tokio worker pool for background
//! tasks, the `anchors` CLI, and the HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │   HTTP   │──▶│  FeedEngine  │──▶│              │
//! │  (axum)  │   └──────────────┘   │ SqliteStore  │
//! │          │   ┌──────────────┐   │  (7 traits)  │
//! │   CLI    │──▶│  Engagement  │──▶│              │
//! └──────────┘   └──────┬───────┘   └──────▲───────┘
//!                       │ dispatch         │
//!                ┌──────▼───────┐          │
//!                │  WorkerPool  │──────────┘
//!                │ score/fanout │
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! anchors init                          # create database
//! anchors load demos/fixture.json       # seed users, anchors, edges
//! anchors feed discover --category popular
//! anchors feed home --viewer ada
//! anchors serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the collaborator traits |
//! | [`fixture`] | JSON bulk loading and score recomputation |
//! | [`worker`] | Background task pool |
//! | [`services`] | Wiring of store, pool, and engine services |
//! | [`feed_cmd`] | `feed` and `notifications` commands |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod feed_cmd;
pub mod fixture;
pub mod migrate;
pub mod server;
pub mod services;
pub mod sqlite_store;
pub mod worker;
