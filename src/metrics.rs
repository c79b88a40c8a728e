//! Cycle metric samples and the views derived from them.
//!
//! Every orchestrator cycle appends one row to
//! `dialog_search_rebuild_metrics`. The rebuilder never reads them back;
//! [`progress`], [`failures`], [`rate`] and [`eta`] exist for operators.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{CycleMetric, QueueEntry, QueueStatus};
use crate::queue;

/// Rolling windows reported by [`rate`], in minutes.
pub const RATE_WINDOWS: [u32; 3] = [1, 5, 15];

/// The window whose realized rate drives [`eta`].
pub const ETA_WINDOW_MINUTES: u32 = 5;

pub async fn record(pool: &SqlitePool, metric: &CycleMetric) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dialog_search_rebuild_metrics
            (recorded_at, worker, strategy, batch_size, resource_budget,
             processed, duration_ms, throughput, note)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(metric.recorded_at)
    .bind(&metric.worker)
    .bind(&metric.strategy)
    .bind(metric.batch_size)
    .bind(metric.resource_budget)
    .bind(metric.processed)
    .bind(metric.duration_ms)
    .bind(metric.throughput)
    .bind(metric.note.map(|n| n.as_str()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent samples first.
pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<CycleMetric>> {
    let rows = sqlx::query(
        r#"
        SELECT recorded_at, worker, strategy, batch_size, resource_budget,
               processed, duration_ms, throughput, note
        FROM dialog_search_rebuild_metrics
        ORDER BY recorded_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CycleMetric {
            recorded_at: row.get("recorded_at"),
            worker: row.get("worker"),
            strategy: row.get("strategy"),
            batch_size: row.get("batch_size"),
            resource_budget: row.get("resource_budget"),
            processed: row.get("processed"),
            duration_ms: row.get("duration_ms"),
            throughput: row.get("throughput"),
            note: row
                .get::<Option<String>, _>("note")
                .as_deref()
                .and_then(crate::models::CycleNote::parse),
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Progress {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
    pub done_ratio: f64,
}

pub async fn progress(pool: &SqlitePool) -> Result<Progress> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM dialog_search_rebuild_queue GROUP BY status",
    )
    .fetch_all(pool)
    .await?;

    let mut p = Progress::default();
    for row in &rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        match QueueStatus::parse(&status) {
            Some(QueueStatus::Pending) => p.pending = n,
            Some(QueueStatus::Processing) => p.processing = n,
            Some(QueueStatus::Done) => p.done = n,
            Some(QueueStatus::Failed) => p.failed = n,
            None => {}
        }
        p.total += n;
    }
    p.done_ratio = done_ratio(p.done, p.total);
    Ok(p)
}

/// Failed rows, most recently updated first.
pub async fn failures(pool: &SqlitePool, limit: i64) -> Result<Vec<QueueEntry>> {
    queue::list_by_status(pool, QueueStatus::Failed, limit).await
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateWindow {
    pub minutes: u32,
    pub cycles: i64,
    pub processed: i64,
    /// Mean of per-cycle throughput over cycles that did work.
    pub avg_throughput: f64,
    /// Dialogs processed divided by the window length.
    pub realized_per_sec: f64,
}

/// Throughput over each of [`RATE_WINDOWS`] ending at `now` (epoch ms).
pub async fn rate(pool: &SqlitePool, now: i64) -> Result<Vec<RateWindow>> {
    let mut windows = Vec::with_capacity(RATE_WINDOWS.len());
    for minutes in RATE_WINDOWS {
        windows.push(rate_window(pool, now, minutes).await?);
    }
    Ok(windows)
}

async fn rate_window(pool: &SqlitePool, now: i64, minutes: u32) -> Result<RateWindow> {
    let since = now - window_ms(minutes);
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS cycles,
               COALESCE(SUM(processed), 0) AS processed,
               COALESCE(AVG(CASE WHEN note IS NULL THEN throughput END), 0.0) AS avg_throughput
        FROM dialog_search_rebuild_metrics
        WHERE recorded_at > ? AND recorded_at <= ?
        "#,
    )
    .bind(since)
    .bind(now)
    .fetch_one(pool)
    .await?;

    let processed: i64 = row.get("processed");
    Ok(RateWindow {
        minutes,
        cycles: row.get("cycles"),
        processed,
        avg_throughput: row.get("avg_throughput"),
        realized_per_sec: realized_rate(processed, minutes),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Eta {
    pub pending: i64,
    pub rate_per_sec: f64,
    pub seconds: f64,
}

/// Time to drain the pending rows at the recent realized rate.
///
/// `None` when nothing was processed in the last [`ETA_WINDOW_MINUTES`].
pub async fn eta(pool: &SqlitePool, now: i64) -> Result<Option<Eta>> {
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM dialog_search_rebuild_queue WHERE status = 'pending'",
    )
    .fetch_one(pool)
    .await?;
    let window = rate_window(pool, now, ETA_WINDOW_MINUTES).await?;

    Ok(eta_seconds(pending, window.realized_per_sec).map(|seconds| Eta {
        pending,
        rate_per_sec: window.realized_per_sec,
        seconds,
    }))
}

fn window_ms(minutes: u32) -> i64 {
    i64::from(minutes) * 60_000
}

pub fn done_ratio(done: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64
    }
}

pub fn realized_rate(processed: i64, minutes: u32) -> f64 {
    if minutes == 0 {
        return 0.0;
    }
    processed as f64 / (f64::from(minutes) * 60.0)
}

pub fn eta_seconds(pending: i64, rate_per_sec: f64) -> Option<f64> {
    if rate_per_sec <= 0.0 || !rate_per_sec.is_finite() {
        None
    } else {
        Some(pending as f64 / rate_per_sec)
    }
}

/// Throughput of one cycle in dialogs per second.
pub fn throughput(processed: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        processed as f64 * 1000.0
    } else {
        processed as f64 * 1000.0 / duration_ms as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_ratio_of_empty_queue_is_zero() {
        assert_eq!(done_ratio(0, 0), 0.0);
        assert_eq!(done_ratio(3, 3), 1.0);
        assert_eq!(done_ratio(1, 4), 0.25);
    }

    #[test]
    fn realized_rate_spreads_over_window() {
        assert_eq!(realized_rate(600, 5), 2.0);
        assert_eq!(realized_rate(0, 1), 0.0);
        assert_eq!(realized_rate(10, 0), 0.0);
    }

    #[test]
    fn eta_undefined_without_rate() {
        assert_eq!(eta_seconds(100, 0.0), None);
        assert_eq!(eta_seconds(100, 4.0), Some(25.0));
        assert_eq!(eta_seconds(0, 4.0), Some(0.0));
    }

    #[test]
    fn throughput_per_second() {
        assert_eq!(throughput(50, 500), 100.0);
        assert_eq!(throughput(0, 500), 0.0);
        assert_eq!(throughput(2, 0), 2000.0);
    }
}
