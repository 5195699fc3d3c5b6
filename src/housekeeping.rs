use crate::api::AppState;
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;
use tokio::time::{interval, Duration};
use walkdir::WalkDir;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Uploads younger than this are never touched: their announcing event
/// may still be in flight between blob write and append.
const SWEEP_GRACE: Duration = Duration::from_secs(3600);

/// Periodically remove uploaded blobs no longer referenced by any event.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let mut tick = interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            match sweep(&state) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "removed orphaned uploads"),
                Err(e) => tracing::warn!(error = %e, "housekeeping sweep failed"),
            }
        }
    });
}

fn sweep(state: &AppState) -> Result<usize> {
    let referenced = referenced_blob_ids(state)?;
    sweep_dir(state.blobs.dir(), &referenced, SWEEP_GRACE)
}

fn referenced_blob_ids(state: &AppState) -> Result<HashSet<String>> {
    let conn = state.pool.get()?;
    let mut stmt = conn.prepare("SELECT image_url FROM messages WHERE image_url IS NOT NULL")?;
    let iter = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = HashSet::new();
    for url in iter {
        if let Some(id) = url?.strip_prefix("/uploads/") {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

fn sweep_dir(dir: &Path, referenced: &HashSet<String>, grace: Duration) -> Result<usize> {
    let cutoff = SystemTime::now().checked_sub(grace);
    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(2).max_depth(2) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        if referenced.contains(&id) {
            continue;
        }
        let fresh = match (entry.metadata()?.modified(), cutoff) {
            (Ok(modified), Some(cutoff)) => modified > cutoff,
            _ => false,
        };
        if fresh {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        removed += 1;
    }
    Ok(removed)
}
