//! The search index store: `dialog_search` plus its FTS5 shadow.
//!
//! Both tables are written together so a committed index row is always
//! searchable. Deletion is never done here; removing a dialog cascades to
//! `dialog_search` and the delete trigger clears the full-text row.

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::document::SearchDocument;
use crate::error::{ReindexError, Result};
use crate::models::{DialogHead, DialogId, SearchIndexEntry, WeightClass};

/// Insert or overwrite the index entry for `head.id`.
///
/// `read_at` must not be later than the moment the dialog's content was
/// read: a dialog edited after that point compares as newer than its entry
/// and is picked up again by the stale seeder.
pub async fn upsert(
    conn: &mut SqliteConnection,
    head: &DialogHead,
    document: &SearchDocument,
    read_at: i64,
) -> Result<()> {
    let id = head.id.to_string();

    sqlx::query(
        r#"
        INSERT INTO dialog_search (dialog_id, party, document, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(dialog_id) DO UPDATE SET
            party = excluded.party,
            document = excluded.document,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&id)
    .bind(&head.scope_key)
    .bind(document.to_string())
    .bind(read_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM dialog_search_fts WHERE dialog_id = ?")
        .bind(&id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO dialog_search_fts (dialog_id, party, weight_a, weight_b, weight_c)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&head.scope_key)
    .bind(document.column_text(WeightClass::Primary))
    .bind(document.column_text(WeightClass::Secondary))
    .bind(document.column_text(WeightClass::Detail))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_entry(pool: &SqlitePool, id: &DialogId) -> Result<Option<SearchIndexEntry>> {
    let row = sqlx::query(
        "SELECT party, document, updated_at FROM dialog_search WHERE dialog_id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let encoded: String = row.get("document");
    let document = encoded
        .parse::<SearchDocument>()
        .map_err(|e| ReindexError::Corrupt(format!("dialog {}: {}", id, e)))?;

    Ok(Some(SearchIndexEntry {
        dialog_id: *id,
        scope_key: row.get("party"),
        document,
        updated_at: row.get("updated_at"),
    }))
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dialog_search")
        .fetch_one(pool)
        .await?;
    Ok(n)
}
