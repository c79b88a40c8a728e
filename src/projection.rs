//! Read side of the primary store.
//!
//! The rebuilder only needs two things from a dialog: its head (scope key and
//! last change) and the stream of text fragments hanging off it. Both come
//! through [`ContentSource`] so tests can substitute their own content.

use std::ops::ControlFlow;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{Row, SqlitePool};

use crate::error::{ReindexError, Result};
use crate::models::{ContentFragment, DialogHead, DialogId, WeightClass};

/// Receives fragments one at a time. Returning `Break` ends the stream.
pub type FragmentVisitor<'a> = dyn FnMut(ContentFragment) -> ControlFlow<()> + Send + 'a;

/// Where dialog content comes from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Scope key and last change of a dialog, or `None` if it no longer exists.
    async fn dialog_head(&self, id: &DialogId) -> Result<Option<DialogHead>>;

    /// Stream every text fragment of a dialog, ordered by weight then source.
    ///
    /// Fragments are read lazily; nothing past the point where the visitor
    /// breaks is fetched.
    async fn for_each_fragment(&self, id: &DialogId, visit: &mut FragmentVisitor<'_>)
        -> Result<()>;
}

/// [`ContentSource`] backed by the `v_dialog_content` view.
#[derive(Clone)]
pub struct SqliteContentSource {
    pool: SqlitePool,
}

impl SqliteContentSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentSource for SqliteContentSource {
    async fn dialog_head(&self, id: &DialogId) -> Result<Option<DialogHead>> {
        let row = sqlx::query("SELECT party, updated_at FROM dialog WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| DialogHead {
            id: *id,
            scope_key: row.get("party"),
            changed_at: row.get("updated_at"),
        }))
    }

    async fn for_each_fragment(
        &self,
        id: &DialogId,
        visit: &mut FragmentVisitor<'_>,
    ) -> Result<()> {
        let mut rows = sqlx::query(
            r#"
            SELECT weight, language, text
            FROM v_dialog_content
            WHERE dialog_id = ?
            ORDER BY weight, source_rank, source_id
            "#,
        )
        .bind(id.to_string())
        .fetch(&self.pool);

        while let Some(row) = rows.try_next().await? {
            let weight: String = row.get("weight");
            let weight = weight
                .chars()
                .next()
                .and_then(WeightClass::from_char)
                .ok_or_else(|| {
                    ReindexError::Corrupt(format!("unknown weight '{}' for dialog {}", weight, id))
                })?;

            let fragment = ContentFragment {
                weight,
                language: row.get("language"),
                text: row.get("text"),
            };
            if visit(fragment).is_break() {
                break;
            }
        }

        Ok(())
    }
}
