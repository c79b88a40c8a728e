//! Error types for the rebuild subsystem.

use thiserror::Error;

use crate::models::DialogId;

/// A fragment that cannot be turned into a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("malformed text: fragment {index} contains a NUL character")]
    MalformedText { index: usize },
}

/// Errors surfaced by seeders, single upserts and rebuild cycles.
#[derive(Error, Debug)]
pub enum ReindexError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to build document for dialog {dialog_id}: {source}")]
    Build {
        dialog_id: DialogId,
        #[source]
        source: BuildError,
    },

    #[error("dialog {0} not found")]
    NotFound(DialogId),

    /// The content source could not produce a dialog's fragments.
    #[error("content source error: {0}")]
    Content(String),

    #[error("stored value is invalid: {0}")]
    Corrupt(String),

    /// A reindex worker task panicked or was cancelled.
    #[error("reindex worker panicked: {0}")]
    WorkerPanicked(String),

    /// A rebuild cycle failed; its claimed batch has been reverted.
    #[error("rebuild cycle failed after claiming {claimed} dialogs: {source}")]
    CycleFailed {
        claimed: usize,
        #[source]
        source: Box<ReindexError>,
    },
}

pub type Result<T> = std::result::Result<T, ReindexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_failure_mentions_batch_and_cause() {
        let err = ReindexError::CycleFailed {
            claimed: 3,
            source: Box::new(ReindexError::Content("boom".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "rebuild cycle failed after claiming 3 dialogs: content source error: boom"
        );
    }

    #[test]
    fn worker_panic_is_its_own_error() {
        let err = ReindexError::WorkerPanicked("task 2 panicked".to_string());
        assert_eq!(err.to_string(), "reindex worker panicked: task 2 panicked");
        assert!(!matches!(err, ReindexError::Content(_)));
    }

    #[test]
    fn build_error_display() {
        let err = BuildError::MalformedText { index: 2 };
        assert_eq!(
            err.to_string(),
            "malformed text: fragment 2 contains a NUL character"
        );
    }
}
