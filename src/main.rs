//! # Dialog Search Index CLI (`dsi`)
//!
//! Operator interface for the dialog search index: schema setup, loading
//! dialogs, seeding the rebuild queue, running rebuild cycles and workers,
//! and inspecting progress.
//!
//! ## Usage
//!
//! ```bash
//! dsi --config ./config/dsi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsi init` | Create the SQLite database and run schema migrations |
//! | `dsi load <file>` | Bulk-load dialogs from a JSON array |
//! | `dsi seed full\|since\|stale` | Enqueue dialogs for rebuild |
//! | `dsi upsert <id>` | Rebuild one dialog now, bypassing the queue |
//! | `dsi cycle` | Run a single claim/build/commit cycle |
//! | `dsi reindex` | Seed and drain the queue with N workers |
//! | `dsi sweep` | Requeue rows whose lease expired |
//! | `dsi status` | Queue progress, throughput and ETA |
//! | `dsi failures` | Rows parked as failed |
//! | `dsi search "<query>" --party <p>` | Scoped search against the index |
//!
//! ## Examples
//!
//! ```bash
//! # Catch up on everything changed since the last deploy, four workers
//! dsi reindex --since 2024-05-01T00:00:00Z --workers 4 --stale-first
//!
//! # Only rebuild entries that are missing or behind their dialog
//! dsi reindex --stale-only
//!
//! # Continue draining after an interrupted run
//! dsi reindex --resume
//! ```

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use dialog_search_index::claim::ClaimStrategy;
use dialog_search_index::config;
use dialog_search_index::dialogs;
use dialog_search_index::migrate;
use dialog_search_index::models::ResourceBudget;
use dialog_search_index::progress::ProgressMode;
use dialog_search_index::queue::{self, SeedCommand};
use dialog_search_index::reindex;
use dialog_search_index::search;
use dialog_search_index::stats;
use dialog_search_index::worker::{self, ReindexOptions, SeedMode};

/// Dialog Search Index: incremental, multi-worker search index rebuilds.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dsi.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dsi",
    about = "Dialog Search Index: incremental rebuilds of the dialog full-text index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dsi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Bulk-load dialogs from a JSON array file.
    Load {
        /// Path to the JSON file.
        file: PathBuf,
    },

    /// Enqueue dialogs for rebuild.
    Seed {
        #[command(subcommand)]
        target: SeedTarget,

        /// Reset matching queue rows to pending (attempts 0, error cleared).
        #[arg(long, global = true)]
        reset: bool,
    },

    /// Rebuild one dialog's index entry immediately.
    Upsert {
        /// Dialog UUID.
        id: String,
    },

    /// Run exactly one rebuild cycle.
    Cycle {
        /// Claim the most out-of-date dialogs first.
        #[arg(long)]
        stale_first: bool,

        /// Dialogs claimed per cycle. Defaults to `reindex.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Memory budget for building the batch, in bytes.
        #[arg(long)]
        work_mem_bytes: Option<u64>,
    },

    /// Seed the queue and drain it with one or more workers.
    #[command(group(
        ArgGroup::new("mode")
            .required(true)
            .args(["full", "since", "stale_only", "resume"])
    ))]
    Reindex {
        /// Reseed every dialog.
        #[arg(long)]
        full: bool,

        /// Reseed dialogs changed at or after this time (RFC 3339 or epoch ms).
        #[arg(long)]
        since: Option<String>,

        /// Reseed dialogs whose index entry is missing or behind.
        #[arg(long)]
        stale_only: bool,

        /// Do not seed; drain what is already queued.
        #[arg(long)]
        resume: bool,

        /// Claim the most out-of-date dialogs first.
        #[arg(long)]
        stale_first: bool,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        workers: Option<usize>,

        /// Pause between batches, per worker.
        #[arg(long)]
        throttle_ms: Option<u64>,

        #[arg(long)]
        work_mem_bytes: Option<u64>,

        /// Progress output on stderr: `off`, `human` or `json`.
        /// Defaults to human on a TTY, otherwise off.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Requeue processing rows whose lease is older than the timeout.
    Sweep {
        /// Lease age in seconds. Defaults to `reindex.lease_timeout_secs`.
        #[arg(long)]
        older_than_secs: Option<u64>,
    },

    /// Show queue progress, throughput and ETA.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List dialogs parked as failed.
    Failures {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Search the index within one party's dialogs.
    Search {
        /// The search query string.
        query: String,

        /// Owning party to scope the search to.
        #[arg(long)]
        party: String,

        /// Language of the query; selects the stopword profile.
        #[arg(long)]
        language: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Every dialog.
    Full,
    /// Dialogs changed at or after a timestamp.
    Since {
        /// RFC 3339 timestamp or epoch milliseconds.
        timestamp: String,
    },
    /// Dialogs never indexed or changed after their last build.
    Stale,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Load { file } => {
            dialogs::run_load(&cfg, &file).await?;
        }
        Commands::Seed { target, reset } => {
            let command = match target {
                SeedTarget::Full => SeedCommand::Full,
                SeedTarget::Since { timestamp } => {
                    SeedCommand::Since(worker::parse_since(&timestamp)?)
                }
                SeedTarget::Stale => SeedCommand::Stale,
            };
            queue::run_seed(&cfg, command, reset).await?;
        }
        Commands::Upsert { id } => {
            let id = uuid::Uuid::parse_str(&id)
                .map_err(|e| anyhow::anyhow!("invalid dialog id '{}': {}", id, e))?;
            reindex::run_upsert(&cfg, &id).await?;
        }
        Commands::Cycle {
            stale_first,
            batch_size,
            work_mem_bytes,
        } => {
            reindex::run_single_cycle(
                &cfg,
                strategy(stale_first),
                batch_size.unwrap_or(cfg.reindex.batch_size),
                ResourceBudget(work_mem_bytes.unwrap_or(cfg.reindex.resource_budget_bytes)),
            )
            .await?;
        }
        Commands::Reindex {
            full,
            since,
            stale_only,
            resume,
            stale_first,
            batch_size,
            workers,
            throttle_ms,
            work_mem_bytes,
            progress,
        } => {
            let mode = if full {
                SeedMode::Full
            } else if let Some(since) = since {
                SeedMode::Since(worker::parse_since(&since)?)
            } else if stale_only {
                SeedMode::StaleOnly
            } else {
                debug_assert!(resume);
                SeedMode::Resume
            };

            let mut options = ReindexOptions::from_config(&cfg, mode);
            options.strategy = strategy(stale_first);
            if let Some(n) = batch_size {
                options.batch_size = n;
            }
            if let Some(n) = workers {
                options.workers = n;
            }
            if let Some(ms) = throttle_ms {
                options.throttle = std::time::Duration::from_millis(ms);
            }
            if let Some(bytes) = work_mem_bytes {
                options.budget = ResourceBudget(bytes);
            }
            if options.batch_size == 0 || options.budget.bytes() == 0 {
                anyhow::bail!("--batch-size and --work-mem-bytes must be > 0");
            }

            let progress_mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(value) => ProgressMode::parse(value).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode: {}. Use off, human, or json.", value)
                })?,
            };

            worker::run_reindex(&cfg, options, progress_mode).await?;
        }
        Commands::Sweep { older_than_secs } => {
            queue::run_sweep(&cfg, older_than_secs).await?;
        }
        Commands::Status { json } => {
            stats::run_status(&cfg, json).await?;
        }
        Commands::Failures { limit } => {
            stats::run_failures(&cfg, limit).await?;
        }
        Commands::Search {
            query,
            party,
            language,
            limit,
        } => {
            search::run_search(&cfg, &query, &party, language.as_deref(), limit).await?;
        }
    }

    Ok(())
}

fn strategy(stale_first: bool) -> ClaimStrategy {
    if stale_first {
        ClaimStrategy::StaleFirst
    } else {
        ClaimStrategy::Standard
    }
}
