//! Write helpers for the primary store.
//!
//! The rebuilder never writes dialogs itself. These helpers exist so the CLI
//! can bulk-load a dataset (`dsi load`) and tests can build fixtures; every
//! helper that changes a dialog's content also bumps its `updated_at`, which
//! is what staleness detection keys on.
//!
//! `dsi load` reads a JSON array of [`DialogRecord`]s:
//!
//! ```json
//! [{
//!   "party": "urn:altinn:organization:identifier-no:912345678",
//!   "content": [{ "kind": "title", "language": "nb", "value": "Skattemelding 2024" }],
//!   "transmissions": [{ "content": [{ "kind": "title", "value": "Kvittering" }] }],
//!   "activities": [{ "description": "Sendt inn" }],
//!   "attachments": [{ "display_name": "skattemelding.pdf" }]
//! }]
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::{now_ms, DialogId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: DialogId,
    pub party: String,
    #[serde(default)]
    pub service_resource: String,
    /// Last content change, epoch ms. Defaults to the time of insertion.
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub content: Vec<ContentValue>,
    #[serde(default)]
    pub transmissions: Vec<TransmissionRecord>,
    #[serde(default)]
    pub activities: Vec<ActivityRecord>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

/// One localized value of a content field (`title`, `summary`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentValue {
    pub kind: String,
    #[serde(default)]
    pub language: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub content: Vec<ContentValue>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    #[serde(default)]
    pub language: Option<String>,
    pub display_name: String,
}

impl DialogRecord {
    pub fn new(party: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            party: party.into(),
            service_resource: String::new(),
            updated_at: None,
            content: Vec::new(),
            transmissions: Vec::new(),
            activities: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: DialogId) -> Self {
        self.id = id;
        self
    }

    pub fn with_content(mut self, kind: &str, language: Option<&str>, value: &str) -> Self {
        self.content.push(ContentValue {
            kind: kind.to_string(),
            language: language.map(str::to_string),
            value: value.to_string(),
        });
        self
    }

    pub fn updated_at(mut self, ts: i64) -> Self {
        self.updated_at = Some(ts);
        self
    }
}

/// Insert a dialog and all of its children in one transaction.
pub async fn insert_dialog(pool: &SqlitePool, record: &DialogRecord) -> Result<DialogId> {
    let mut tx = pool.begin().await?;
    insert_with(&mut tx, record).await?;
    tx.commit().await?;
    Ok(record.id)
}

async fn insert_with(conn: &mut SqliteConnection, record: &DialogRecord) -> Result<()> {
    let now = now_ms();
    let id = record.id.to_string();
    let updated_at = record.updated_at.unwrap_or(now);

    sqlx::query(
        "INSERT INTO dialog (id, party, service_resource, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&record.party)
    .bind(&record.service_resource)
    .bind(updated_at.min(now))
    .bind(updated_at)
    .execute(&mut *conn)
    .await?;

    for value in &record.content {
        insert_content(&mut *conn, &id, value).await?;
    }

    for transmission in &record.transmissions {
        let transmission_id = transmission.id.to_string();
        sqlx::query("INSERT INTO dialog_transmission (id, dialog_id, created_at) VALUES (?, ?, ?)")
            .bind(&transmission_id)
            .bind(&id)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        for value in &transmission.content {
            sqlx::query(
                "INSERT INTO transmission_content (id, transmission_id, kind, language, value) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&transmission_id)
            .bind(&value.kind)
            .bind(&value.language)
            .bind(&value.value)
            .execute(&mut *conn)
            .await?;
        }

        for attachment in &transmission.attachments {
            insert_attachment(&mut *conn, None, Some(&transmission_id), attachment).await?;
        }
    }

    for activity in &record.activities {
        sqlx::query(
            "INSERT INTO dialog_activity (id, dialog_id, created_at, language, description) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&id)
        .bind(now)
        .bind(&activity.language)
        .bind(&activity.description)
        .execute(&mut *conn)
        .await?;
    }

    for attachment in &record.attachments {
        insert_attachment(&mut *conn, Some(&id), None, attachment).await?;
    }

    Ok(())
}

async fn insert_content(conn: &mut SqliteConnection, dialog_id: &str, value: &ContentValue) -> Result<()> {
    sqlx::query(
        "INSERT INTO dialog_content (id, dialog_id, kind, language, value) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(dialog_id)
    .bind(&value.kind)
    .bind(&value.language)
    .bind(&value.value)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_attachment(
    conn: &mut SqliteConnection,
    dialog_id: Option<&str>,
    transmission_id: Option<&str>,
    attachment: &AttachmentRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO dialog_attachment (id, dialog_id, transmission_id, language, display_name) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(dialog_id)
    .bind(transmission_id)
    .bind(&attachment.language)
    .bind(&attachment.display_name)
    .execute(conn)
    .await?;
    Ok(())
}

/// Add a content value and mark the dialog changed at `at`.
pub async fn add_content(
    pool: &SqlitePool,
    id: &DialogId,
    value: &ContentValue,
    at: i64,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let touched = set_updated_at(&mut tx, id, at).await?;
    if touched {
        insert_content(&mut tx, &id.to_string(), value).await?;
    }
    tx.commit().await?;
    Ok(touched)
}

/// Set a dialog's last-change timestamp. Returns false if it does not exist.
pub async fn touch_dialog(pool: &SqlitePool, id: &DialogId, at: i64) -> Result<bool> {
    let mut conn = pool.acquire().await?;
    set_updated_at(&mut conn, id, at).await
}

async fn set_updated_at(conn: &mut SqliteConnection, id: &DialogId, at: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE dialog SET updated_at = ? WHERE id = ?")
        .bind(at)
        .bind(id.to_string())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete a dialog. Children, its index entry and its queue row cascade.
pub async fn delete_dialog(pool: &SqlitePool, id: &DialogId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM dialog WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Insert every record of a JSON array file. Returns the number inserted.
pub async fn load_file(pool: &SqlitePool, path: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dialog file: {}", path.display()))?;
    let records: Vec<DialogRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse dialog file: {}", path.display()))?;

    let mut tx = pool.begin().await?;
    for record in &records {
        insert_with(&mut tx, record)
            .await
            .with_context(|| format!("Failed to insert dialog {}", record.id))?;
    }
    tx.commit().await?;
    Ok(records.len())
}

/// Entry point for `dsi load`.
pub async fn run_load(config: &Config, path: &Path) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let loaded = load_file(&pool, path).await;
    pool.close().await;
    println!("Loaded {} dialogs from {}", loaded?, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_defaults_fill_missing_fields() {
        let records: Vec<DialogRecord> = serde_json::from_str(
            r#"[{ "party": "p1", "content": [{ "kind": "title", "value": "Hello" }] }]"#,
        )
        .unwrap();
        let record = &records[0];
        assert_eq!(record.party, "p1");
        assert_eq!(record.service_resource, "");
        assert!(record.updated_at.is_none());
        assert_eq!(record.content[0].language, None);
        assert!(record.transmissions.is_empty());
    }

    #[test]
    fn missing_party_is_rejected() {
        let parsed: std::result::Result<Vec<DialogRecord>, _> =
            serde_json::from_str(r#"[{ "content": [] }]"#);
        assert!(parsed.is_err());
    }
}
