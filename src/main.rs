//! # Anchor Feed CLI (`anchors`)
//!
//! The `anchors` binary initializes the database, loads demo data, prints
//! feeds and notifications as JSON, and runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! anchors --config ./config/anchors.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `anchors init` | Create the SQLite database and run schema migrations |
//! | `anchors load <fixture.json>` | Bulk-load users, anchors, items, and edges |
//! | `anchors feed home\|discover\|tag` | Print one feed page as JSON |
//! | `anchors recompute-scores` | Recount counters and rewrite every engagement score |
//! | `anchors notifications <user>` | Print a user's recent notifications |
//! | `anchors serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Popular public content, second page
//! anchors feed discover --category popular \
//!     --cursor eyJzY29yZSI6NDIsImNyZWF0ZWRBdCI6IjIwMjQtMDUtMDFUMTI6MDA6MDBaIiwiaWQiOiI0ZjFjMmE5ZS04ZDNiLTRjNWEtOWU3Zi0xYTJiM2M0ZDVlNmYifQ
//!
//! # Home feed for a user, including their own anchors
//! anchors feed home --viewer ada --include-own
//!
//! # Most recent anchors tagged rust
//! anchors feed tag rust --sort recent
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use anchor_feed::config::{self, Config};
use anchor_feed::feed_cmd::{self, FeedKind};
use anchor_feed::{fixture, migrate, server};
use anchor_feed_core::planner::FeedParams;

/// Anchor Feed: social feeds and engagement aggregation for anchors.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/anchors.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "anchors",
    about = "Anchor Feed: social feeds and engagement aggregation for anchors",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/anchors.toml`.
    #[arg(long, global = true, default_value = "./config/anchors.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again leaves existing data untouched.
    Init,

    /// Load users, anchors, items, and edges from a JSON fixture.
    ///
    /// Counters are recounted from the loaded edges and every score is
    /// recomputed afterwards.
    Load {
        /// Path to the fixture file.
        path: PathBuf,
    },

    /// Print one page of a feed as JSON.
    Feed {
        #[command(subcommand)]
        feed: FeedCommand,
    },

    /// Recount every counter from the edge tables and rewrite every score.
    RecomputeScores,

    /// Print a user's most recent notifications.
    Notifications {
        /// User id or username.
        user: String,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum FeedCommand {
    /// Content from users the viewer follows.
    Home {
        #[command(flatten)]
        page: PageArgs,

        /// Include the viewer's own anchors.
        #[arg(long)]
        include_own: bool,
    },

    /// Public content ranked by category.
    Discover {
        #[command(flatten)]
        page: PageArgs,

        /// `trending`, `popular`, or `recent`.
        #[arg(long)]
        category: Option<String>,

        /// Restrict to one tag.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Public content carrying one tag.
    Tag {
        tag: String,

        #[command(flatten)]
        page: PageArgs,

        /// `popular` or `recent`.
        #[arg(long)]
        sort: Option<String>,
    },
}

#[derive(clap::Args)]
struct PageArgs {
    /// Viewer id or username. Required for `home`.
    #[arg(long)]
    viewer: Option<String>,

    #[arg(long)]
    limit: Option<i64>,

    /// `nextCursor` from a previous page.
    #[arg(long)]
    cursor: Option<String>,
}

impl PageArgs {
    fn params(&self) -> FeedParams {
        FeedParams {
            limit: self.limit,
            cursor: self.cursor.clone(),
            ..Default::default()
        }
    }
}

fn init_tracing(config: &Config) {
    let level = &config.log.level;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!(
                "anchor_feed={level},anchor_feed_core={level},tower_http={level}",
                level = level
            )
            .into()
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { path } => {
            fixture::run_load(&cfg, &path).await?;
        }
        Commands::Feed { feed } => {
            let (kind, viewer, params) = match feed {
                FeedCommand::Home { page, include_own } => (
                    FeedKind::Home,
                    page.viewer.clone(),
                    FeedParams {
                        include_own,
                        ..page.params()
                    },
                ),
                FeedCommand::Discover {
                    page,
                    category,
                    tag,
                } => (
                    FeedKind::Discover,
                    page.viewer.clone(),
                    FeedParams {
                        category,
                        tag,
                        ..page.params()
                    },
                ),
                FeedCommand::Tag { tag, page, sort } => (
                    FeedKind::Tag(tag),
                    page.viewer.clone(),
                    FeedParams {
                        sort,
                        ..page.params()
                    },
                ),
            };
            feed_cmd::run_feed(&cfg, kind, viewer, params).await?;
        }
        Commands::RecomputeScores => {
            fixture::run_recompute_scores(&cfg).await?;
        }
        Commands::Notifications { user, limit } => {
            feed_cmd::run_notifications(&cfg, &user, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
