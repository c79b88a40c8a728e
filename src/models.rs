//! Core data models used throughout the search-index rebuilder.
//!
//! These types represent the fragments read from the primary store, the
//! rebuild queue rows, the index rows, and the per-cycle metric samples.
//! All timestamps are Unix epoch milliseconds.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::document::SearchDocument;

/// Identity of a dialog (the parent record being indexed).
pub type DialogId = Uuid;

/// Relevance tier applied to a text fragment during document building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum WeightClass {
    /// Dialog title.
    Primary,
    /// Other dialog content and transmission content.
    Secondary,
    /// Activity descriptions and attachment display names.
    Detail,
}

impl WeightClass {
    pub const ALL: [WeightClass; 3] = [Self::Primary, Self::Secondary, Self::Detail];

    pub const fn as_char(self) -> char {
        match self {
            Self::Primary => 'A',
            Self::Secondary => 'B',
            Self::Detail => 'C',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(Self::Primary),
            'B' => Some(Self::Secondary),
            'C' => Some(Self::Detail),
            _ => None,
        }
    }

    /// BM25 column boost used when ranking matches.
    pub const fn boost(self) -> f64 {
        match self {
            Self::Primary => 10.0,
            Self::Secondary => 4.0,
            Self::Detail => 1.0,
        }
    }
}

/// One text-bearing fragment produced by the content projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFragment {
    pub weight: WeightClass,
    pub language: Option<String>,
    pub text: String,
}

impl ContentFragment {
    pub fn new(weight: WeightClass, language: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            weight,
            language: language.map(str::to_string),
            text: text.into(),
        }
    }
}

/// The per-dialog attributes the rebuilder needs besides its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogHead {
    pub id: DialogId,
    /// Owning party, copied into the index for scoped lookups.
    pub scope_key: String,
    /// Last content change.
    pub changed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the rebuild queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub dialog_id: DialogId,
    pub status: QueueStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

/// A row of the search index store.
#[derive(Debug, Clone)]
pub struct SearchIndexEntry {
    pub dialog_id: DialogId,
    pub scope_key: String,
    pub document: SearchDocument,
    pub updated_at: i64,
}

/// Distinguishes cycles that did not process anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleNote {
    EmptyBatch,
    Exception,
}

impl CycleNote {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyBatch => "empty-batch",
            Self::Exception => "exception",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "empty-batch" => Some(Self::EmptyBatch),
            "exception" => Some(Self::Exception),
            _ => None,
        }
    }
}

/// One sample per orchestrator cycle, whatever its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CycleMetric {
    pub recorded_at: i64,
    pub worker: String,
    pub strategy: String,
    pub batch_size: i64,
    pub resource_budget: i64,
    pub processed: i64,
    pub duration_ms: i64,
    pub throughput: f64,
    pub note: Option<CycleNote>,
}

/// Per-cycle soft memory ceiling, in bytes, for building one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget(pub u64);

impl Default for ResourceBudget {
    fn default() -> Self {
        Self(256 * 1024 * 1024)
    }
}

impl ResourceBudget {
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// How many documents of at most `max_document_bytes` fit in the budget.
    /// Never less than one.
    pub fn documents_per_cycle(self, max_document_bytes: usize) -> usize {
        let per_document = (max_document_bytes as u64).max(1);
        usize::try_from(self.0 / per_document)
            .unwrap_or(usize::MAX)
            .max(1)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_ts(ts_ms: i64) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_bounds_documents_per_cycle() {
        let budget = ResourceBudget(256 * 1024 * 1024);
        assert_eq!(budget.documents_per_cycle(1024 * 1024), 256);
        assert_eq!(budget.documents_per_cycle(0), 256 * 1024 * 1024);

        // A budget smaller than one document still admits that document.
        assert_eq!(ResourceBudget(1024).documents_per_cycle(1024 * 1024), 1);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Done,
            QueueStatus::Failed,
        ] {
            assert_eq!(QueueStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QueueStatus::parse("stuck"), None);
    }

    #[test]
    fn weight_letters() {
        assert_eq!(WeightClass::from_char('A'), Some(WeightClass::Primary));
        assert_eq!(WeightClass::Detail.as_char(), 'C');
        assert_eq!(WeightClass::from_char('D'), None);
    }
}
