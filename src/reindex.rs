//! The rebuild orchestrator.
//!
//! One [`Reindexer::run_cycle`] call claims a batch, builds a document per
//! claimed dialog and writes every index row together with the queue
//! transition to done in a single transaction. Any failure after the claim
//! reverts the whole lease back to pending and is returned to the caller.
//! Every cycle, successful or not, leaves a metric sample behind.
//!
//! Documents are built before the write transaction opens, so a slow build
//! never holds the database write lock.

use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::claim::ClaimStrategy;
use crate::config::Config;
use crate::db;
use crate::document::{DocumentBuilder, SearchDocument};
use crate::error::{ReindexError, Result};
use crate::index_store;
use crate::metrics;
use crate::models::{now_ms, CycleMetric, CycleNote, DialogHead, DialogId, ResourceBudget};
use crate::projection::{ContentSource, SqliteContentSource};
use crate::queue::{self, Lease};

#[derive(Clone)]
pub struct Reindexer {
    pool: SqlitePool,
    source: Arc<dyn ContentSource>,
    builder: DocumentBuilder,
    worker: String,
    max_attempts: Option<u32>,
}

impl Reindexer {
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn ContentSource>,
        builder: DocumentBuilder,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            source,
            builder,
            worker: worker.into(),
            max_attempts: None,
        }
    }

    /// Reindexer reading content straight from `pool`, configured from `config`.
    pub fn from_config(pool: SqlitePool, config: &Config) -> Self {
        let source = Arc::new(SqliteContentSource::new(pool.clone()));
        Self::new(
            pool,
            source,
            DocumentBuilder::new(config.document.max_terms)
                .with_max_bytes(config.document.max_bytes),
            config.worker_name(),
        )
        .with_max_attempts(config.reindex.max_attempts)
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rebuild one dialog's index entry now, bypassing the queue.
    pub async fn upsert_one(&self, id: &DialogId) -> Result<()> {
        let read_at = read_stamp();
        let head = self
            .source
            .dialog_head(id)
            .await?
            .ok_or(ReindexError::NotFound(*id))?;
        let built = self
            .builder
            .build(self.source.as_ref(), id)
            .await?;
        if built.truncated {
            warn!(dialog_id = %id, terms = built.document.len(), "document truncated");
        }

        let mut tx = self.pool.begin().await?;
        index_store::upsert(&mut tx, &head, &built.document, read_at).await?;
        tx.commit().await?;

        debug!(dialog_id = %id, terms = built.document.len(), "upserted index entry");
        Ok(())
    }

    /// Run one claim/build/commit cycle. Returns the number of dialogs indexed.
    ///
    /// At most `batch_size` dialogs are claimed, and never more than
    /// `budget` can hold at the builder's per-document byte ceiling.
    pub async fn run_cycle(
        &self,
        strategy: ClaimStrategy,
        batch_size: usize,
        budget: ResourceBudget,
    ) -> Result<u64> {
        let started = Instant::now();
        let lease = Lease::new();

        let claim_size = batch_size.min(budget.documents_per_cycle(self.builder.max_bytes()));
        let claimed = match strategy
            .claimer()
            .claim(&self.pool, claim_size, &lease)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                self.record(strategy, batch_size, budget, 0, &started, Some(CycleNote::Exception))
                    .await;
                return Err(ReindexError::CycleFailed {
                    claimed: 0,
                    source: Box::new(err),
                });
            }
        };

        if claimed.is_empty() {
            self.record(strategy, batch_size, budget, 0, &started, Some(CycleNote::EmptyBatch))
                .await;
            debug!(worker = %self.worker, strategy = %strategy, "no pending dialogs");
            return Ok(0);
        }

        match self.process(&claimed, &lease).await {
            Ok(processed) => {
                let duration_ms = self
                    .record(strategy, batch_size, budget, processed, &started, None)
                    .await;
                info!(
                    worker = %self.worker,
                    strategy = %strategy,
                    claimed = claimed.len(),
                    processed,
                    duration_ms,
                    "rebuild cycle complete"
                );
                Ok(processed)
            }
            Err(err) => {
                let message = err.to_string();
                match queue::revert(&self.pool, &lease, &message, self.max_attempts).await {
                    Ok(reverted) => warn!(
                        worker = %self.worker,
                        strategy = %strategy,
                        claimed = claimed.len(),
                        reverted,
                        error = %message,
                        "rebuild cycle failed; batch reverted"
                    ),
                    Err(revert_err) => warn!(
                        worker = %self.worker,
                        claimed = claimed.len(),
                        error = %message,
                        revert_error = %revert_err,
                        "rebuild cycle failed and the batch could not be reverted"
                    ),
                }
                self.record(strategy, batch_size, budget, 0, &started, Some(CycleNote::Exception))
                    .await;
                Err(ReindexError::CycleFailed {
                    claimed: claimed.len(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn process(&self, claimed: &[DialogId], lease: &Lease) -> Result<u64> {
        let mut built: Vec<(DialogHead, SearchDocument, i64)> = Vec::with_capacity(claimed.len());

        for id in claimed {
            let read_at = read_stamp();
            let Some(head) = self.source.dialog_head(id).await? else {
                debug!(dialog_id = %id, "dialog deleted after claim; skipping");
                continue;
            };
            let result = self.builder.build(self.source.as_ref(), id).await?;
            if result.truncated {
                warn!(
                    dialog_id = %id,
                    terms = result.document.len(),
                    max_bytes = self.builder.max_bytes(),
                    "document truncated"
                );
            }
            built.push((head, result.document, read_at));
        }

        let mut tx = self.pool.begin().await?;
        for (head, document, read_at) in &built {
            index_store::upsert(&mut tx, head, document, *read_at).await?;
        }
        let completed = queue::complete(&mut tx, lease, now_ms()).await?;
        tx.commit().await?;

        let processed = built.len() as u64;
        if completed != processed {
            warn!(
                worker = %self.worker,
                lease = lease.token(),
                processed,
                completed,
                "lease lost during cycle; affected queue rows were reset and stay queued"
            );
        }
        Ok(processed)
    }

    /// Append a metric sample. Returns the cycle duration in milliseconds.
    async fn record(
        &self,
        strategy: ClaimStrategy,
        batch_size: usize,
        budget: ResourceBudget,
        processed: u64,
        started: &Instant,
        note: Option<CycleNote>,
    ) -> u64 {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metric = CycleMetric {
            recorded_at: now_ms(),
            worker: self.worker.clone(),
            strategy: strategy.as_str().to_string(),
            batch_size: i64::try_from(batch_size).unwrap_or(i64::MAX),
            resource_budget: i64::try_from(budget.bytes()).unwrap_or(i64::MAX),
            processed: processed as i64,
            duration_ms: duration_ms as i64,
            throughput: metrics::throughput(processed, duration_ms),
            note,
        };
        if let Err(err) = metrics::record(&self.pool, &metric).await {
            warn!(worker = %self.worker, error = %err, "failed to record cycle metric");
        }
        duration_ms
    }
}

/// Timestamp recorded on an index entry, taken before its dialog is read.
/// One millisecond back so an edit landing in the same millisecond as the
/// read still compares as newer.
fn read_stamp() -> i64 {
    now_ms() - 1
}

/// Entry point for `dsi upsert`.
pub async fn run_upsert(config: &Config, id: &DialogId) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = Reindexer::from_config(pool.clone(), config).upsert_one(id).await;
    pool.close().await;
    result?;
    println!("Indexed dialog {}", id);
    Ok(())
}

/// Entry point for `dsi cycle`: run exactly one cycle.
pub async fn run_single_cycle(
    config: &Config,
    strategy: ClaimStrategy,
    batch_size: usize,
    budget: ResourceBudget,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = Reindexer::from_config(pool.clone(), config)
        .run_cycle(strategy, batch_size, budget)
        .await;
    pool.close().await;
    println!("Processed {} dialogs ({})", result?, strategy);
    Ok(())
}
