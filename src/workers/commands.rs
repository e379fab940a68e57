//! Subcommand runners for the `swaz` binary.

use std::path::Path;
use swaz::core::config::SignalConfig;
use swaz::core::persistence::{HistoryEntry, HistoryStore, ScheduledJobStore};
use swaz::core::rendezvous::SignalServer;
use swaz::utils::sos::SignalOfStop;
use tracing::info;

/// Serve rendezvous until `sos` fires.
pub async fn signal(config: &SignalConfig, sos: SignalOfStop) -> anyhow::Result<()> {
    let server = SignalServer::bind(config, sos).await?;
    println!("Rendezvous server listening on {}", server.local_addr()?);
    server.run().await
}

pub fn history(data_dir: &Path, clear: bool) -> anyhow::Result<()> {
    let store = HistoryStore::open(data_dir);
    if clear {
        store.clear()?;
        println!("History cleared.");
        return Ok(());
    }

    let entries = store.entries()?;
    if entries.is_empty() {
        println!("No transfers yet.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    info!(event = "history_listed", count = entries.len());
    Ok(())
}

pub fn schedule(data_dir: &Path, clear: bool) -> anyhow::Result<()> {
    let store = ScheduledJobStore::open(data_dir);
    if clear {
        store.clear()?;
        println!("Scheduled transfer cleared.");
        return Ok(());
    }

    let Some(job) = store.get()? else {
        println!("No scheduled transfer.");
        return Ok(());
    };
    let due = if job.is_due(chrono::Utc::now()) {
        " (due)"
    } else {
        ""
    };
    println!(
        "Room {} at {}{}",
        job.room_id,
        job.scheduled_time.format("%Y-%m-%d %H:%M:%S UTC"),
        due
    );
    for file in &job.file_metadata {
        println!("  {}  {}  {}", file.name, format_bytes(file.size), file.mime_type);
    }
    Ok(())
}

fn format_entry(entry: &HistoryEntry) -> String {
    let mut line = format!(
        "{}  {:<8}  {}  {}",
        entry.date.format("%Y-%m-%d %H:%M"),
        format!("{:?}", entry.status),
        entry.file_name,
        format_bytes(entry.file_size),
    );
    if let Some(speed) = entry.average_speed {
        line.push_str(&format!("  {}/s", format_bytes(speed as u64)));
    }
    line
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
