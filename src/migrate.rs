use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table, view, index and trigger. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    create_primary_store(pool).await?;
    create_content_view(pool).await?;
    create_search_store(pool).await?;
    create_rebuild_tables(pool).await?;
    Ok(())
}

async fn create_primary_store(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog (
            id TEXT PRIMARY KEY,
            party TEXT NOT NULL,
            service_resource TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_content (
            id TEXT PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            language TEXT,
            value TEXT NOT NULL,
            FOREIGN KEY (dialog_id) REFERENCES dialog(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_transmission (
            id TEXT PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (dialog_id) REFERENCES dialog(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transmission_content (
            id TEXT PRIMARY KEY,
            transmission_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            language TEXT,
            value TEXT NOT NULL,
            FOREIGN KEY (transmission_id) REFERENCES dialog_transmission(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_activity (
            id TEXT PRIMARY KEY,
            dialog_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            language TEXT,
            description TEXT,
            FOREIGN KEY (dialog_id) REFERENCES dialog(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_attachment (
            id TEXT PRIMARY KEY,
            dialog_id TEXT,
            transmission_id TEXT,
            language TEXT,
            display_name TEXT NOT NULL,
            FOREIGN KEY (dialog_id) REFERENCES dialog(id) ON DELETE CASCADE,
            FOREIGN KEY (transmission_id) REFERENCES dialog_transmission(id) ON DELETE CASCADE,
            CHECK (dialog_id IS NOT NULL OR transmission_id IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dialog_updated_at ON dialog(updated_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dialog_content_dialog ON dialog_content(dialog_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transmission_dialog ON dialog_transmission(dialog_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transmission_content_transmission ON transmission_content(transmission_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_activity_dialog ON dialog_activity(dialog_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_attachment_dialog ON dialog_attachment(dialog_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attachment_transmission ON dialog_attachment(transmission_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Every text-bearing fragment of a dialog, one row per fragment.
///
/// `weight` is the relevance class letter, `source_rank` orders child kinds
/// so that streaming a dialog's rows is deterministic.
async fn create_content_view(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS v_dialog_content AS
            SELECT c.dialog_id AS dialog_id,
                   CASE WHEN c.kind = 'title' THEN 'A' ELSE 'B' END AS weight,
                   c.language AS language,
                   c.value AS text,
                   0 AS source_rank,
                   c.id AS source_id
            FROM dialog_content c
            UNION ALL
            SELECT t.dialog_id, 'B', tc.language, tc.value, 1, tc.id
            FROM transmission_content tc
            JOIN dialog_transmission t ON t.id = tc.transmission_id
            UNION ALL
            SELECT a.dialog_id, 'C', a.language, a.description, 2, a.id
            FROM dialog_activity a
            WHERE a.description IS NOT NULL AND a.description <> ''
            UNION ALL
            SELECT att.dialog_id, 'C', att.language, att.display_name, 3, att.id
            FROM dialog_attachment att
            WHERE att.dialog_id IS NOT NULL
            UNION ALL
            SELECT t.dialog_id, 'C', att.language, att.display_name, 4, att.id
            FROM dialog_attachment att
            JOIN dialog_transmission t ON t.id = att.transmission_id
            WHERE att.dialog_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_search_store(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_search (
            dialog_id TEXT PRIMARY KEY,
            party TEXT NOT NULL,
            document TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (dialog_id) REFERENCES dialog(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='dialog_search_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE dialog_search_fts USING fts5(
                dialog_id UNINDEXED,
                party UNINDEXED,
                weight_a,
                weight_b,
                weight_c,
                tokenize = 'unicode61 remove_diacritics 0'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Cascaded deletes of a dialog must also drop its full-text row.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_dialog_search_delete
        AFTER DELETE ON dialog_search
        BEGIN
            DELETE FROM dialog_search_fts WHERE dialog_id = old.dialog_id;
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dialog_search_party ON dialog_search(party)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_rebuild_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_search_rebuild_queue (
            dialog_id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'done', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            lease_token TEXT,
            leased_at INTEGER,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (dialog_id) REFERENCES dialog(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rebuild_queue_status ON dialog_search_rebuild_queue(status, dialog_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rebuild_queue_lease ON dialog_search_rebuild_queue(lease_token)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dialog_search_rebuild_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at INTEGER NOT NULL,
            worker TEXT NOT NULL,
            strategy TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            resource_budget INTEGER NOT NULL,
            processed INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            throughput REAL NOT NULL,
            note TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rebuild_metrics_recorded_at ON dialog_search_rebuild_metrics(recorded_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
