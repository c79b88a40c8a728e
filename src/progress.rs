//! Reindex progress reporting.
//!
//! Reports observable progress during `dsi reindex` so operators see how much
//! was seeded, how the queue is draining, and when the run has finished.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::metrics::Progress;

/// A single progress event for a reindex run.
#[derive(Clone, Debug)]
pub enum ReindexProgressEvent {
    /// The queue was seeded before workers started.
    Seeded { mode: String, enqueued: u64 },
    /// Periodic queue snapshot while workers run.
    Draining {
        progress: Progress,
        processed: u64,
        rate_per_sec: f64,
    },
    /// All workers stopped.
    Finished { processed: u64, elapsed_secs: f64 },
}

/// Reports reindex progress. Implementations write to stderr (human or JSON).
pub trait ReindexProgressReporter: Send + Sync {
    fn report(&self, event: ReindexProgressEvent);
}

/// Human-friendly progress on stderr: "reindex  draining  1,234 / 5,000 done  (12.5/s)".
pub struct StderrProgress;

impl ReindexProgressReporter for StderrProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let line = match &event {
            ReindexProgressEvent::Seeded { mode, enqueued } => {
                format!("reindex  seeded ({})  {} dialogs\n", mode, format_number(*enqueued))
            }
            ReindexProgressEvent::Draining {
                progress,
                rate_per_sec,
                ..
            } => format!(
                "reindex  draining  {} / {} done  {} pending  {} failed  ({:.1}/s)\n",
                format_number(progress.done.max(0) as u64),
                format_number(progress.total.max(0) as u64),
                format_number(progress.pending.max(0) as u64),
                format_number(progress.failed.max(0) as u64),
                rate_per_sec
            ),
            ReindexProgressEvent::Finished {
                processed,
                elapsed_secs,
            } => format!(
                "reindex  finished  {} dialogs in {:.1}s\n",
                format_number(*processed),
                elapsed_secs
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ReindexProgressReporter for JsonProgress {
    fn report(&self, event: ReindexProgressEvent) {
        let obj = match &event {
            ReindexProgressEvent::Seeded { mode, enqueued } => serde_json::json!({
                "event": "progress",
                "phase": "seeded",
                "mode": mode,
                "enqueued": enqueued
            }),
            ReindexProgressEvent::Draining {
                progress,
                processed,
                rate_per_sec,
            } => serde_json::json!({
                "event": "progress",
                "phase": "draining",
                "queue": progress,
                "processed": processed,
                "rate_per_sec": rate_per_sec
            }),
            ReindexProgressEvent::Finished {
                processed,
                elapsed_secs,
            } => serde_json::json!({
                "event": "progress",
                "phase": "finished",
                "processed": processed,
                "elapsed_secs": elapsed_secs
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ReindexProgressReporter for NoProgress {
    fn report(&self, _event: ReindexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ReindexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_mode_names() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
