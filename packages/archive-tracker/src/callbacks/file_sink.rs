//! Append-only JSON Lines sink.

use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::CallbackResult;
use crate::types::event::CallbackEvent;

/// Append one event as a single line.
///
/// The file is opened and closed on every write so a crash never leaves a
/// buffered, half-written line behind. Parent directories are not created.
pub async fn append_event(path: &Path, event: &CallbackEvent) -> CallbackResult<()> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

/// Read every event back from a JSONL file, skipping unparseable lines.
pub async fn read_events(path: &Path) -> CallbackResult<Vec<CallbackEvent>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
