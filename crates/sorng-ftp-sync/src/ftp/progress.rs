//! Session notifications and transfer progress tracking.

use crate::ftp::error::{CommandError, TransferError};
use crate::ftp::types::*;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

/// Hooks a host application can implement to follow a session.
///
/// Every transfer entry point reports through the same hooks.
pub trait SessionObserver: Send + Sync {
    fn connecting(&self, _host: &str, _reconnecting: bool) {}

    /// Called after every chunk.
    fn progress(&self, _event: &ProgressEvent) {}

    fn transfer_finished(
        &self,
        _task: &TransferTask,
        _result: &Result<TransferOutcome, TransferError>,
    ) {
    }

    /// Every fallback for `operation` on `path` failed.
    fn command_failed(&self, _operation: &str, _path: &str, _error: &CommandError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

// ─── Progress board ──────────────────────────────────────────────────

/// Keeps a live [`TransferProgress`] per task id.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    entries: StdMutex<HashMap<String, TransferProgress>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<TransferProgress> {
        self.entries
            .lock()
            .ok()
            .and_then(|map| map.get(task_id).cloned())
    }

    pub fn snapshot(&self) -> Vec<TransferProgress> {
        self.entries
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop entries that are no longer in progress. Returns how many.
    pub fn clear_finished(&self) -> usize {
        match self.entries.lock() {
            Ok(mut map) => {
                let before = map.len();
                map.retain(|_, p| p.state == TransferState::InProgress);
                before - map.len()
            }
            Err(_) => 0,
        }
    }
}

fn snapshot_of(event: &ProgressEvent) -> TransferProgress {
    let elapsed = (Utc::now() - event.started_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
        .max(0.001);
    let speed = (event.transferred_bytes as f64 / elapsed) as u64;
    let eta = match event.total_bytes {
        Some(total) if speed > 0 => Some(total.saturating_sub(event.transferred_bytes) / speed),
        _ => None,
    };
    let percent = match event.total_bytes {
        Some(0) => 100.0,
        Some(total) => (event.transferred_bytes as f64 / total as f64 * 100.0).min(100.0) as f32,
        None => 0.0,
    };

    TransferProgress {
        task_id: event.task_id.clone(),
        direction: event.direction,
        local_path: event.local_path.clone(),
        remote_path: event.remote_path.clone(),
        transferred_bytes: event.transferred_bytes,
        speed_bps: speed,
        eta_seconds: eta,
        percent,
        total_bytes: event.total_bytes,
        state: TransferState::InProgress,
    }
}

impl SessionObserver for ProgressBoard {
    fn progress(&self, event: &ProgressEvent) {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(event.task_id.clone(), snapshot_of(event));
        }
    }

    fn transfer_finished(
        &self,
        task: &TransferTask,
        result: &Result<TransferOutcome, TransferError>,
    ) {
        let Ok(mut map) = self.entries.lock() else {
            return;
        };
        let entry = map
            .entry(task.id.clone())
            .or_insert_with(|| TransferProgress {
                task_id: task.id.clone(),
                direction: task.direction,
                local_path: task.local_path.clone(),
                remote_path: task.remote_path.clone(),
                transferred_bytes: 0,
                speed_bps: 0,
                eta_seconds: None,
                percent: 0.0,
                total_bytes: None,
                state: TransferState::InProgress,
            });
        match result {
            Ok(outcome) => {
                entry.state = TransferState::Completed;
                entry.transferred_bytes = outcome.bytes_transferred;
                entry.percent = 100.0;
                entry.eta_seconds = Some(0);
            }
            Err(TransferError::Cancelled) => entry.state = TransferState::Cancelled,
            Err(_) => entry.state = TransferState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn event(task_id: &str, transferred: u64, total: Option<u64>) -> ProgressEvent {
        ProgressEvent {
            task_id: task_id.into(),
            direction: TransferDirection::Upload,
            local_path: PathBuf::from("/tmp/a"),
            remote_path: "/a".into(),
            chunk_bytes: 8192,
            transferred_bytes: transferred,
            total_bytes: total,
            started_at: Utc::now() - chrono::Duration::seconds(2),
        }
    }

    #[test]
    fn board_tracks_percent_and_speed() {
        let board = ProgressBoard::new();
        board.progress(&event("t1", 5_000, Some(10_000)));
        let p = board.get("t1").unwrap();
        assert_eq!(p.state, TransferState::InProgress);
        assert!((p.percent - 50.0).abs() < 0.01);
        assert!(p.speed_bps > 0 && p.speed_bps <= 2_500);
        assert!(p.eta_seconds.is_some());
    }

    #[test]
    fn unknown_total_has_no_eta() {
        let board = ProgressBoard::new();
        board.progress(&event("t1", 5_000, None));
        let p = board.get("t1").unwrap();
        assert_eq!(p.eta_seconds, None);
        assert_eq!(p.percent, 0.0);
    }

    #[test]
    fn completion_and_clearing() {
        let board = ProgressBoard::new();
        let task = TransferTask::upload("/tmp/a", "/a");
        board.progress(&event(&task.id, 10, Some(10)));
        board.transfer_finished(
            &task,
            &Ok(TransferOutcome {
                task_id: task.id.clone(),
                bytes_transferred: 10,
                chunks: 1,
                duration_ms: 5,
            }),
        );
        assert_eq!(board.get(&task.id).unwrap().state, TransferState::Completed);

        let failed = TransferTask::download("/b", "/tmp/b");
        board.transfer_finished(&failed, &Err(TransferError::Cancelled));
        assert_eq!(board.get(&failed.id).unwrap().state, TransferState::Cancelled);

        assert_eq!(board.clear_finished(), 2);
        assert!(board.snapshot().is_empty());
    }
}
