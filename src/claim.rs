//! Batch claimers.
//!
//! A claim is one `UPDATE ... RETURNING` statement: it picks up to
//! `batch_size` pending rows in the strategy's order, moves them to
//! processing under the caller's lease and bumps their attempt count.
//! SQLite runs the statement under its write lock, so two concurrent claims
//! never see the same pending row; the loser of the lock simply picks from
//! what is still pending once it gets in.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::Result;
use crate::models::{now_ms, DialogId};
use crate::queue::{parse_dialog_id, Lease};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimStrategy {
    /// Dialog id ascending.
    #[default]
    Standard,
    /// Never-indexed first, then by how far the index lags the dialog.
    StaleFirst,
}

impl ClaimStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::StaleFirst => "stale-first",
        }
    }

    pub fn claimer(self) -> &'static dyn Claimer {
        match self {
            Self::Standard => &StandardClaimer,
            Self::StaleFirst => &StaleFirstClaimer,
        }
    }
}

impl fmt::Display for ClaimStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "stale-first" | "stale_first" => Ok(Self::StaleFirst),
            other => Err(format!(
                "unknown claim strategy '{}' (expected standard or stale-first)",
                other
            )),
        }
    }
}

#[async_trait]
pub trait Claimer: Send + Sync {
    fn strategy(&self) -> ClaimStrategy;

    /// Reserve up to `batch_size` pending rows under `lease`.
    ///
    /// Returns the claimed ids sorted ascending; empty when nothing is pending.
    async fn claim(
        &self,
        pool: &SqlitePool,
        batch_size: usize,
        lease: &Lease,
    ) -> Result<Vec<DialogId>>;
}

pub struct StandardClaimer;

#[async_trait]
impl Claimer for StandardClaimer {
    fn strategy(&self) -> ClaimStrategy {
        ClaimStrategy::Standard
    }

    async fn claim(
        &self,
        pool: &SqlitePool,
        batch_size: usize,
        lease: &Lease,
    ) -> Result<Vec<DialogId>> {
        claim_ordered(
            pool,
            batch_size,
            lease,
            r#"
            SELECT q.dialog_id
            FROM dialog_search_rebuild_queue q
            WHERE q.status = 'pending'
            ORDER BY q.dialog_id
            LIMIT ?
            "#,
        )
        .await
    }
}

pub struct StaleFirstClaimer;

#[async_trait]
impl Claimer for StaleFirstClaimer {
    fn strategy(&self) -> ClaimStrategy {
        ClaimStrategy::StaleFirst
    }

    async fn claim(
        &self,
        pool: &SqlitePool,
        batch_size: usize,
        lease: &Lease,
    ) -> Result<Vec<DialogId>> {
        // A missing index row counts as the largest possible lag.
        claim_ordered(
            pool,
            batch_size,
            lease,
            r#"
            SELECT q.dialog_id
            FROM dialog_search_rebuild_queue q
            JOIN dialog d ON d.id = q.dialog_id
            LEFT JOIN dialog_search s ON s.dialog_id = q.dialog_id
            WHERE q.status = 'pending'
            ORDER BY (s.dialog_id IS NULL) DESC,
                     CASE WHEN s.dialog_id IS NULL THEN 9223372036854775807
                          ELSE d.updated_at - s.updated_at END DESC,
                     q.dialog_id ASC
            LIMIT ?
            "#,
        )
        .await
    }
}

async fn claim_ordered(
    pool: &SqlitePool,
    batch_size: usize,
    lease: &Lease,
    candidates_sql: &str,
) -> Result<Vec<DialogId>> {
    if batch_size == 0 {
        return Ok(Vec::new());
    }

    let sql = format!(
        r#"
        UPDATE dialog_search_rebuild_queue
        SET status = 'processing',
            attempts = attempts + 1,
            lease_token = ?,
            leased_at = ?,
            updated_at = ?
        WHERE status = 'pending'
          AND dialog_id IN ({})
        RETURNING dialog_id
        "#,
        candidates_sql
    );

    let now = now_ms();
    let rows = sqlx::query(&sql)
        .bind(lease.token())
        .bind(lease.granted_at())
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .fetch_all(pool)
        .await?;

    let mut ids = rows
        .iter()
        .map(|row| parse_dialog_id(&row.get::<String, _>("dialog_id")))
        .collect::<Result<Vec<_>>>()?;
    ids.sort_unstable();

    debug!(claimed = ids.len(), batch_size, lease = lease.token(), "claimed batch");
    Ok(ids)
}
