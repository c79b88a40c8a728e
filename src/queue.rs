//! The rebuild queue: seeding, lease bookkeeping and inspection.
//!
//! Rows move `pending → processing` when claimed (see [`crate::claim`]) and
//! leave `processing` only through [`complete`], [`revert`] or
//! [`requeue_expired`]. Each claim stamps the rows with a [`Lease`]; the
//! finishing calls only touch rows still held under that lease, so a reset
//! seeder running mid-cycle wins over the late completion of that cycle.

use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::{ReindexError, Result};
use crate::models::{now_ms, DialogId, QueueEntry, QueueStatus};

/// Ownership token for the rows taken by one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    token: String,
    granted_at: i64,
}

impl Lease {
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            granted_at: now_ms(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn granted_at(&self) -> i64 {
        self.granted_at
    }
}

impl Default for Lease {
    fn default() -> Self {
        Self::new()
    }
}

/// Which dialogs a seeder enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    All,
    ChangedSince(i64),
    Stale,
}

impl Selection {
    fn label(self) -> &'static str {
        match self {
            Self::All => "full",
            Self::ChangedSince(_) => "since",
            Self::Stale => "stale",
        }
    }

    /// `FROM ... WHERE ...` producing the matching dialogs as `d`.
    ///
    /// The WHERE clause is never empty: SQLite needs one to tell an upsert's
    /// `ON CONFLICT` apart from a join constraint.
    fn source_sql(self) -> &'static str {
        match self {
            Self::All => "FROM dialog d WHERE true",
            Self::ChangedSince(_) => "FROM dialog d WHERE d.updated_at >= ?",
            Self::Stale => {
                "FROM dialog d \
                 LEFT JOIN dialog_search s ON s.dialog_id = d.id \
                 WHERE s.dialog_id IS NULL OR d.updated_at > s.updated_at"
            }
        }
    }

    fn since(self) -> Option<i64> {
        match self {
            Self::ChangedSince(ts) => Some(ts),
            _ => None,
        }
    }
}

/// Enqueue every known dialog.
pub async fn seed_full(pool: &SqlitePool, reset_existing: bool) -> Result<u64> {
    seed(pool, Selection::All, reset_existing).await
}

/// Enqueue dialogs whose last change is at or after `since` (epoch ms).
pub async fn seed_since(pool: &SqlitePool, since: i64, reset_matching: bool) -> Result<u64> {
    seed(pool, Selection::ChangedSince(since), reset_matching).await
}

/// Enqueue dialogs never indexed or changed after their last build.
pub async fn seed_stale(pool: &SqlitePool, reset_matching: bool) -> Result<u64> {
    seed(pool, Selection::Stale, reset_matching).await
}

async fn seed(pool: &SqlitePool, selection: Selection, reset: bool) -> Result<u64> {
    let now = now_ms();
    let mut tx = pool.begin().await?;

    let mut reset_count = 0;
    if reset {
        let sql = format!(
            r#"
            UPDATE dialog_search_rebuild_queue
            SET status = 'pending', attempts = 0, last_error = NULL,
                lease_token = NULL, leased_at = NULL, updated_at = ?
            WHERE dialog_id IN (SELECT d.id {})
            "#,
            selection.source_sql()
        );
        let mut query = sqlx::query(&sql).bind(now);
        if let Some(since) = selection.since() {
            query = query.bind(since);
        }
        reset_count = query.execute(&mut *tx).await?.rows_affected();
    }

    let sql = format!(
        r#"
        INSERT INTO dialog_search_rebuild_queue (dialog_id, status, attempts, updated_at)
        SELECT d.id, 'pending', 0, ? {}
        ON CONFLICT(dialog_id) DO NOTHING
        "#,
        selection.source_sql()
    );
    let mut query = sqlx::query(&sql).bind(now);
    if let Some(since) = selection.since() {
        query = query.bind(since);
    }
    let inserted = query.execute(&mut *tx).await?.rows_affected();

    tx.commit().await?;

    info!(
        seeder = selection.label(),
        reset,
        reset_rows = reset_count,
        inserted,
        "seeded rebuild queue"
    );
    Ok(reset_count + inserted)
}

/// Mark every row held under `lease` as done.
pub async fn complete(conn: &mut SqliteConnection, lease: &Lease, now: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE dialog_search_rebuild_queue
        SET status = 'done', last_error = NULL,
            lease_token = NULL, leased_at = NULL, updated_at = ?
        WHERE lease_token = ? AND status = 'processing'
        "#,
    )
    .bind(now)
    .bind(lease.token())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Return every row held under `lease` to pending, recording `error`.
///
/// With `max_attempts` set, rows that have been claimed that many times are
/// parked as failed instead.
pub async fn revert(
    pool: &SqlitePool,
    lease: &Lease,
    error: &str,
    max_attempts: Option<u32>,
) -> Result<u64> {
    let cap = max_attempts.map(i64::from);
    let result = sqlx::query(
        r#"
        UPDATE dialog_search_rebuild_queue
        SET status = CASE WHEN ? IS NOT NULL AND attempts >= ? THEN 'failed' ELSE 'pending' END,
            last_error = ?,
            lease_token = NULL, leased_at = NULL, updated_at = ?
        WHERE lease_token = ? AND status = 'processing'
        "#,
    )
    .bind(cap)
    .bind(cap)
    .bind(error)
    .bind(now_ms())
    .bind(lease.token())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Return processing rows leased before `older_than` (epoch ms) to pending.
pub async fn requeue_expired(pool: &SqlitePool, older_than: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE dialog_search_rebuild_queue
        SET status = 'pending', last_error = 'lease expired',
            lease_token = NULL, leased_at = NULL, updated_at = ?
        WHERE status = 'processing' AND (leased_at IS NULL OR leased_at < ?)
        "#,
    )
    .bind(now_ms())
    .bind(older_than)
    .execute(pool)
    .await?;

    let n = result.rows_affected();
    if n > 0 {
        info!(requeued = n, older_than, "requeued expired leases");
    }
    Ok(n)
}

/// Which seeder `dsi seed` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedCommand {
    Full,
    Since(i64),
    Stale,
}

/// Entry point for `dsi seed`.
pub async fn run_seed(config: &Config, command: SeedCommand, reset: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = match command {
        SeedCommand::Full => seed_full(&pool, reset).await,
        SeedCommand::Since(ts) => seed_since(&pool, ts, reset).await,
        SeedCommand::Stale => seed_stale(&pool, reset).await,
    };
    pool.close().await;
    println!("Enqueued {} dialogs", result?);
    Ok(())
}

/// Entry point for `dsi sweep`.
pub async fn run_sweep(config: &Config, older_than_secs: Option<u64>) -> anyhow::Result<()> {
    let timeout_secs = older_than_secs.unwrap_or(config.reindex.lease_timeout_secs);
    let cutoff = now_ms() - i64::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    let pool = db::connect(config).await?;
    let result = requeue_expired(&pool, cutoff).await;
    pool.close().await;
    println!("Requeued {} dialogs with leases older than {}s", result?, timeout_secs);
    Ok(())
}

pub async fn get_entry(pool: &SqlitePool, id: &DialogId) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(
        r#"
        SELECT dialog_id, status, attempts, last_error, updated_at
        FROM dialog_search_rebuild_queue
        WHERE dialog_id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| entry_from_row(&row)).transpose()
}

/// Rows in `status`, most recently updated first.
pub async fn list_by_status(
    pool: &SqlitePool,
    status: QueueStatus,
    limit: i64,
) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT dialog_id, status, attempts, last_error, updated_at
        FROM dialog_search_rebuild_queue
        WHERE status = ?
        ORDER BY updated_at DESC, dialog_id
        LIMIT ?
        "#,
    )
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

pub(crate) fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<QueueEntry> {
    let id: String = row.get("dialog_id");
    let status: String = row.get("status");
    Ok(QueueEntry {
        dialog_id: parse_dialog_id(&id)?,
        status: QueueStatus::parse(&status)
            .ok_or_else(|| ReindexError::Corrupt(format!("unknown queue status '{}'", status)))?,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn parse_dialog_id(value: &str) -> Result<DialogId> {
    Uuid::parse_str(value)
        .map_err(|e| ReindexError::Corrupt(format!("bad dialog id '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_are_unique() {
        let a = Lease::new();
        let b = Lease::new();
        assert_ne!(a.token(), b.token());
        assert!(b.granted_at() >= a.granted_at());
    }

    #[test]
    fn seed_sources_always_have_a_where_clause() {
        for selection in [Selection::All, Selection::ChangedSince(0), Selection::Stale] {
            assert!(selection.source_sql().contains("WHERE"));
        }
        assert_eq!(Selection::ChangedSince(42).since(), Some(42));
        assert_eq!(Selection::Stale.since(), None);
    }
}
