//! Rebuild status and failure reports.
//!
//! `dsi status` summarizes the queue, recent throughput and the expected
//! time to drain; `dsi failures` lists parked rows with their last error.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::index_store;
use crate::metrics;
use crate::models::now_ms;

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let now = now_ms();

    let progress = metrics::progress(&pool).await?;
    let rates = metrics::rate(&pool, now).await?;
    let eta = metrics::eta(&pool, now).await?;
    let indexed = index_store::count(&pool).await?;
    let last_cycle = metrics::recent(&pool, 1).await?.into_iter().next();
    pool.close().await;

    if json {
        let report = serde_json::json!({
            "progress": progress,
            "indexed": indexed,
            "rate": rates,
            "eta_seconds": eta.as_ref().map(|e| e.seconds),
            "last_cycle": last_cycle,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Dialog Search Index: Rebuild Status");
    println!("====================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Indexed:     {}", indexed);
    println!();
    println!("  Queue:       {}", progress.total);
    println!("    pending    {}", progress.pending);
    println!("    processing {}", progress.processing);
    println!("    done       {}", progress.done);
    println!("    failed     {}", progress.failed);
    println!("  Done:        {:.1}%", progress.done_ratio * 100.0);

    println!();
    println!("  {:<8} {:>7} {:>10} {:>12} {:>12}", "WINDOW", "CYCLES", "PROCESSED", "AVG/CYCLE/s", "REALIZED/s");
    println!("  {}", "-".repeat(53));
    for w in &rates {
        println!(
            "  {:<8} {:>7} {:>10} {:>12.1} {:>12.2}",
            format!("{}m", w.minutes),
            w.cycles,
            w.processed,
            w.avg_throughput,
            w.realized_per_sec
        );
    }

    println!();
    match &eta {
        Some(eta) => println!(
            "  ETA:         {} ({} pending at {:.1}/s)",
            format_duration(eta.seconds),
            eta.pending,
            eta.rate_per_sec
        ),
        None => println!("  ETA:         unknown (no recent progress)"),
    }
    match &last_cycle {
        Some(m) => println!(
            "  Last cycle:  {} by {} ({} processed{})",
            format_ts_relative(m.recorded_at),
            m.worker,
            m.processed,
            m.note.map(|n| format!(", {}", n.as_str())).unwrap_or_default()
        ),
        None => println!("  Last cycle:  never"),
    }
    println!();

    Ok(())
}

/// Run the failures command: list failed rows, newest first.
pub async fn run_failures(config: &Config, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let failures = metrics::failures(&pool, limit).await;
    pool.close().await;
    let failures = failures?;

    if failures.is_empty() {
        println!("No failed dialogs.");
        return Ok(());
    }

    println!("  {:<36} {:>8}   {:<16} {}", "DIALOG", "ATTEMPTS", "UPDATED", "ERROR");
    println!("  {}", "-".repeat(90));
    for entry in &failures {
        println!(
            "  {:<36} {:>8}   {:<16} {}",
            entry.dialog_id,
            entry.attempts,
            format_ts_relative(entry.updated_at),
            entry.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Format an epoch-millisecond timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts_ms: i64) -> String {
    let delta = (now_ms() - ts_ms) / 1000;

    if delta < 0 {
        return format_ts_iso(ts_ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(268_435_456), "256.0 MB");
    }

    #[test]
    fn durations_pick_largest_unit() {
        assert_eq!(format_duration(42.4), "42s");
        assert_eq!(format_duration(125.0), "2m 05s");
        assert_eq!(format_duration(3.0 * 3600.0 + 61.0), "3h 01m");
    }

    #[test]
    fn relative_timestamps() {
        assert_eq!(format_ts_relative(now_ms()), "just now");
        assert_eq!(format_ts_relative(now_ms() - 2 * 3_600_000), "2 hours ago");
    }
}
