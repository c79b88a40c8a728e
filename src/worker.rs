//! Multi-worker reindex driver behind `dsi reindex`.
//!
//! Optionally seeds the queue, sweeps expired leases, then runs `workers`
//! tokio tasks that each loop [`Reindexer::run_cycle`] until a cycle
//! processes nothing. A side task reports queue progress on a fixed
//! interval. Setting the shutdown flag stops workers from starting new
//! cycles; in-flight cycles finish normally.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::DateTime;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::claim::ClaimStrategy;
use crate::config::Config;
use crate::db;
use crate::error::ReindexError;
use crate::metrics;
use crate::models::{now_ms, ResourceBudget};
use crate::progress::{ProgressMode, ReindexProgressEvent, ReindexProgressReporter};
use crate::queue;
use crate::reindex::Reindexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    /// Every dialog.
    Full,
    /// Dialogs changed at or after the timestamp (epoch ms).
    Since(i64),
    /// Dialogs whose index entry is missing or older than the dialog.
    StaleOnly,
    /// Drain whatever is already queued.
    Resume,
}

impl SeedMode {
    pub fn label(&self) -> &'static str {
        match self {
            SeedMode::Full => "full",
            SeedMode::Since(_) => "since",
            SeedMode::StaleOnly => "stale-only",
            SeedMode::Resume => "resume",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReindexOptions {
    pub mode: SeedMode,
    pub strategy: ClaimStrategy,
    pub batch_size: usize,
    pub workers: usize,
    pub throttle: Duration,
    pub budget: ResourceBudget,
    pub lease_timeout: Duration,
    pub progress_interval: Duration,
}

impl ReindexOptions {
    pub fn from_config(config: &Config, mode: SeedMode) -> Self {
        Self {
            mode,
            strategy: ClaimStrategy::Standard,
            batch_size: config.reindex.batch_size,
            workers: config.reindex.workers,
            throttle: Duration::from_millis(config.reindex.throttle_ms),
            budget: ResourceBudget(config.reindex.resource_budget_bytes),
            lease_timeout: Duration::from_secs(config.reindex.lease_timeout_secs),
            progress_interval: Duration::from_secs(config.reindex.progress_interval_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReindexSummary {
    pub seeded: u64,
    pub requeued: u64,
    pub processed: u64,
    pub elapsed: Duration,
    /// Rows that moved to done during the run, across all workers.
    pub done_delta: i64,
    pub rate_per_sec: f64,
}

/// Seed (per `options.mode`) and drain the queue.
///
/// Workers stop on their own error; the first error is returned once every
/// worker has stopped.
pub async fn reindex(
    reindexer: &Reindexer,
    options: &ReindexOptions,
    reporter: Arc<dyn ReindexProgressReporter>,
    mut shutdown: watch::Receiver<bool>,
) -> std::result::Result<ReindexSummary, ReindexError> {
    let pool = reindexer.pool().clone();

    let cutoff = now_ms() - i64::try_from(options.lease_timeout.as_millis()).unwrap_or(i64::MAX);
    let requeued = queue::requeue_expired(&pool, cutoff).await?;

    let seeded = match options.mode {
        SeedMode::Full => queue::seed_full(&pool, true).await?,
        SeedMode::Since(ts) => queue::seed_since(&pool, ts, true).await?,
        SeedMode::StaleOnly => queue::seed_stale(&pool, true).await?,
        SeedMode::Resume => 0,
    };
    reporter.report(ReindexProgressEvent::Seeded {
        mode: options.mode.label().to_string(),
        enqueued: seeded,
    });

    let done_before = metrics::progress(&pool).await?.done;
    let started = Instant::now();

    info!(
        mode = options.mode.label(),
        strategy = %options.strategy,
        workers = options.workers,
        batch_size = options.batch_size,
        budget = options.budget.bytes(),
        seeded,
        requeued,
        "reindex started"
    );

    let progress_task = tokio::spawn(report_progress(
        pool.clone(),
        Arc::clone(&reporter),
        options.progress_interval,
        done_before,
        started,
    ));

    let mut handles = Vec::with_capacity(options.workers);
    for index in 0..options.workers.max(1) {
        let worker = reindexer
            .clone()
            .with_worker(format!("{}#{}", reindexer.worker(), index));
        let options = options.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_worker(worker, options, shutdown).await
        }));
    }

    let mut processed = 0;
    let mut first_error: Option<ReindexError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(n)) => processed += n,
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(join_err) => {
                error!(error = %join_err, "reindex worker panicked");
                first_error.get_or_insert(ReindexError::WorkerPanicked(join_err.to_string()));
            }
        }
    }
    progress_task.abort();

    if *shutdown.borrow_and_update() {
        warn!("reindex interrupted; remaining rows stay queued");
    }

    let elapsed = started.elapsed();
    let done_delta = metrics::progress(&pool).await?.done - done_before;
    let rate_per_sec = per_second(done_delta, elapsed);

    reporter.report(ReindexProgressEvent::Finished {
        processed,
        elapsed_secs: elapsed.as_secs_f64(),
    });
    info!(
        processed,
        done_delta,
        elapsed_ms = elapsed.as_millis() as u64,
        rate_per_sec,
        "reindex finished"
    );

    match first_error {
        Some(err) => Err(err),
        None => Ok(ReindexSummary {
            seeded,
            requeued,
            processed,
            elapsed,
            done_delta,
            rate_per_sec,
        }),
    }
}

async fn run_worker(
    reindexer: Reindexer,
    options: ReindexOptions,
    mut shutdown: watch::Receiver<bool>,
) -> std::result::Result<u64, ReindexError> {
    let mut processed = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let n = match reindexer
            .run_cycle(options.strategy, options.batch_size, options.budget)
            .await
        {
            Ok(n) => n,
            Err(err) => {
                error!(worker = reindexer.worker(), error = %err, "reindex worker stopped");
                return Err(err);
            }
        };
        if n == 0 {
            break;
        }
        processed += n;

        if !options.throttle.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(options.throttle) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
    info!(worker = reindexer.worker(), processed, "reindex worker drained");
    Ok(processed)
}

async fn report_progress(
    pool: SqlitePool,
    reporter: Arc<dyn ReindexProgressReporter>,
    every: Duration,
    done_before: i64,
    started: Instant,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match metrics::progress(&pool).await {
            Ok(progress) => {
                let processed = (progress.done - done_before).max(0) as u64;
                let rate_per_sec = per_second(processed as i64, started.elapsed());
                info!(
                    total = progress.total,
                    pending = progress.pending,
                    processing = progress.processing,
                    done = progress.done,
                    failed = progress.failed,
                    rate_per_sec,
                    "reindex progress"
                );
                reporter.report(ReindexProgressEvent::Draining {
                    progress,
                    processed,
                    rate_per_sec,
                });
            }
            Err(err) => warn!(error = %err, "failed to read reindex progress"),
        }
    }
}

fn per_second(count: i64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

/// Parse `--since`: RFC 3339, or a bare epoch-millisecond integer.
pub fn parse_since(value: &str) -> Result<i64> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    let dt = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid --since timestamp '{}' (expected RFC 3339)", value))?;
    Ok(dt.timestamp_millis())
}

/// Entry point for `dsi reindex`.
pub async fn run_reindex(
    config: &Config,
    mut options: ReindexOptions,
    progress: ProgressMode,
) -> Result<()> {
    options.workers = options.workers.max(1);
    let pool = db::connect(config).await?;
    let reindexer = Reindexer::from_config(pool.clone(), config);
    let reporter: Arc<dyn ReindexProgressReporter> = Arc::from(progress.reporter());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; finishing in-flight batches");
            let _ = stop_tx.send(true);
        }
    });

    let result = reindex(&reindexer, &options, reporter, stop_rx).await;
    pool.close().await;
    let summary = result.context("reindex failed")?;

    println!("Reindex ({})", options.mode.label());
    println!("  Seeded:     {}", summary.seeded);
    if summary.requeued > 0 {
        println!("  Requeued:   {} (expired leases)", summary.requeued);
    }
    println!("  Processed:  {}", summary.processed);
    println!("  Elapsed:    {:.1}s", summary.elapsed.as_secs_f64());
    println!("  Rate:       {:.1} dialogs/s", summary.rate_per_sec);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_accepts_rfc3339_and_millis() {
        assert_eq!(parse_since("1700000000000").unwrap(), 1_700_000_000_000);
        assert_eq!(
            parse_since("2024-01-01T00:00:00Z").unwrap(),
            1_704_067_200_000
        );
        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn rate_of_zero_elapsed_is_zero() {
        assert_eq!(per_second(10, Duration::ZERO), 0.0);
        assert_eq!(per_second(10, Duration::from_secs(5)), 2.0);
    }
}
