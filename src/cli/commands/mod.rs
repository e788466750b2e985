//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod history;
mod init;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, FetchMode, LoadOptions};

#[derive(Parser)]
#[command(name = "stocktrail")]
#[command(about = "Stock and price history tracker for product catalog pages")]
#[command(version)]
pub struct Cli {
    /// Target directory or database file (overrides config file).
    /// Can be a directory containing stocktrail.db or a .db file directly.
    #[arg(long, short = 't', global = true, env = "STOCKTRAIL_TARGET")]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Visit every product in the catalog and record stock and price
    Crawl {
        /// Catalog file (default: product_data.json in the data directory)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Minimum delay between requests in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Store a page snapshot with every observation (implies --fetch rendered)
        #[arg(long)]
        snapshots: bool,
        /// How pages are fetched
        #[arg(long, value_enum)]
        fetch: Option<FetchMode>,
        /// Run continuously, one crawl every interval
        #[arg(long)]
        daemon: bool,
        /// Seconds to wait between runs in daemon mode (default: 3600)
        #[arg(long, default_value = "3600")]
        interval: u64,
    },

    /// Print observation history as JSON lines
    History {
        /// Only this product id
        #[arg(long)]
        product: Option<i64>,
        /// Only this category
        #[arg(long)]
        category: Option<String>,
        /// Only this subcategory
        #[arg(long)]
        subcategory: Option<String>,
        /// Product name contains (case-insensitive)
        #[arg(long)]
        name: Option<String>,
        /// Observed at or after (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Observed at or before (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// Maximum number of observations
        #[arg(short, long)]
        limit: Option<u32>,
        /// Add stock_change relative to the previous observation of the same product
        #[arg(long)]
        changes: bool,
    },

    /// List tracked products
    Products {
        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Export the snapshot stored with an observation
    Snapshot {
        /// Observation id (see `history`)
        observation_id: i64,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        target: cli.target,
    };
    let (mut settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Crawl {
            catalog,
            delay_ms,
            snapshots,
            fetch,
            daemon,
            interval,
        } => {
            if let Some(catalog) = catalog {
                settings.catalog_path = catalog;
            }
            if let Some(delay_ms) = delay_ms {
                settings.request_delay_ms = delay_ms;
            }
            if let Some(fetch) = fetch {
                settings.fetch_mode = fetch;
            }
            settings.snapshots |= snapshots;
            crawl::cmd_crawl(&settings, daemon, interval).await
        }
        Commands::History {
            product,
            category,
            subcategory,
            name,
            from,
            to,
            limit,
            changes,
        } => {
            let query = history::build_query(
                product,
                category,
                subcategory,
                name,
                from.as_deref(),
                to.as_deref(),
                limit,
            )?;
            history::cmd_history(&settings, &query, changes)
        }
        Commands::Products { json } => history::cmd_products(&settings, json),
        Commands::Snapshot {
            observation_id,
            output,
        } => history::cmd_snapshot(&settings, observation_id, &output),
    }
}
