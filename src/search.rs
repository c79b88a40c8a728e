//! Scoped lookups against the search index.
//!
//! The query is analyzed with the same profiles as the documents, each lexeme
//! becomes a quoted FTS5 term (all terms must match), and results are ranked
//! with BM25 using the weight-class boosts on the three weight columns.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::analyzer;
use crate::config::Config;
use crate::db;
use crate::models::{format_ts, DialogId, WeightClass};
use crate::queue::parse_dialog_id;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub dialog_id: DialogId,
    pub party: String,
    /// Higher is better.
    pub score: f64,
    pub indexed_at: i64,
}

/// FTS5 expression requiring every lexeme of `query`, or `None` if it has none.
pub fn match_expression(query: &str, language: Option<&str>) -> Option<String> {
    let terms: Vec<String> = analyzer::profile_for(language)
        .tokenize(query)
        .map(|lexeme| format!("\"{}\"", lexeme.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

fn rank_expression() -> String {
    let [a, b, c] = WeightClass::ALL.map(WeightClass::boost);
    format!("bm25(dialog_search_fts, 0.0, 0.0, {:.1}, {:.1}, {:.1})", a, b, c)
}

/// Dialogs of `party` whose document matches `query`, best first.
pub async fn search_scoped(
    pool: &SqlitePool,
    party: &str,
    query: &str,
    language: Option<&str>,
    limit: i64,
) -> crate::error::Result<Vec<SearchHit>> {
    let Some(expression) = match_expression(query, language) else {
        return Ok(Vec::new());
    };

    let sql = format!(
        r#"
        SELECT dialog_search_fts.dialog_id AS dialog_id,
               dialog_search_fts.party AS party,
               {} AS score,
               s.updated_at AS updated_at
        FROM dialog_search_fts
        JOIN dialog_search s ON s.dialog_id = dialog_search_fts.dialog_id
        WHERE dialog_search_fts MATCH ?
          AND dialog_search_fts.party = ?
        ORDER BY score, dialog_search_fts.dialog_id
        LIMIT ?
        "#,
        rank_expression()
    );

    let rows = sqlx::query(&sql)
        .bind(&expression)
        .bind(party)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("dialog_id");
            let rank: f64 = row.get("score");
            Ok(SearchHit {
                dialog_id: parse_dialog_id(&id)?,
                party: row.get("party"),
                score: -rank, // bm25 is lower-is-better
                indexed_at: row.get("updated_at"),
            })
        })
        .collect()
}

/// Entry point for `dsi search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    party: &str,
    language: Option<&str>,
    limit: i64,
) -> Result<()> {
    if match_expression(query, language).is_none() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let hits = search_scoped(&pool, party, query, language, limit).await;
    pool.close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.dialog_id);
        println!("    party: {}", hit.party);
        println!("    indexed: {}", format_ts(hit.indexed_at));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_expression_quotes_and_ands_terms() {
        assert_eq!(
            match_expression("Hello, World", None).as_deref(),
            Some("\"hello\" AND \"world\"")
        );
    }

    #[test]
    fn stopword_only_queries_match_nothing() {
        assert_eq!(match_expression("the and of", Some("en")), None);
        assert_eq!(match_expression("   ", None), None);
    }

    #[test]
    fn rank_uses_weight_boosts() {
        assert_eq!(
            rank_expression(),
            "bm25(dialog_search_fts, 0.0, 0.0, 10.0, 4.0, 1.0)"
        );
    }
}
