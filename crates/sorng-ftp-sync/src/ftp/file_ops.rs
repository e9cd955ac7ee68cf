//! Uploads and downloads: one chunked copy shared by every entry point.
//!
//! After each chunk the running total is updated, a [`ProgressEvent`] is
//! emitted and the rate limiter runs. Whether pauses block the thread or
//! suspend the task is decided by the [`Pacing`] passed in.

use crate::ftp::error::{FtpError, TransferError};
use crate::ftp::progress::SessionObserver;
use crate::ftp::rate_limit::{Pacing, RateLimiter};
use crate::ftp::transport::Transport;
use crate::ftp::types::*;
use chrono::Utc;
use log::debug;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Per-transfer settings.
pub struct CopyOptions<'a> {
    pub chunk_size: usize,
    pub limit_kbps: i64,
    pub pacing: Pacing,
    pub observer: &'a dyn SessionObserver,
    pub cancel: &'a AtomicBool,
}

/// Which end of the copy an I/O error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

impl Side {
    fn error(self, e: std::io::Error) -> TransferError {
        match self {
            Side::Local => TransferError::LocalIo(e),
            Side::Remote => TransferError::RemoteIo(FtpError::from(e)),
        }
    }
}

/// Copy `source` into `sink` chunk by chunk. Returns `(bytes, chunks)`.
async fn copy_chunks<R, W>(
    source: &mut R,
    source_side: Side,
    sink: &mut W,
    sink_side: Side,
    task: &TransferTask,
    total_bytes: Option<u64>,
    opts: &CopyOptions<'_>,
) -> Result<(u64, u64), TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let limiter = RateLimiter::new(opts.limit_kbps, opts.pacing);
    let started_at = Utc::now();
    let mut buf = vec![0u8; opts.chunk_size.max(1)];
    let mut transferred = 0u64;
    let mut chunks = 0u64;

    loop {
        if opts.cancel.load(Ordering::SeqCst) {
            return Err(TransferError::Cancelled);
        }
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| source_side.error(e))?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| sink_side.error(e))?;

        transferred += n as u64;
        chunks += 1;
        opts.observer.progress(&ProgressEvent {
            task_id: task.id.clone(),
            direction: task.direction,
            local_path: task.local_path.clone(),
            remote_path: task.remote_path.clone(),
            chunk_bytes: n as u64,
            transferred_bytes: transferred,
            total_bytes,
            started_at,
        });
        limiter.throttle(transferred).await;
    }

    sink.flush().await.map_err(|e| sink_side.error(e))?;
    Ok((transferred, chunks))
}

// ─── UPLOAD (STOR) ───────────────────────────────────────────────────

/// Upload `task.local_path` to `task.remote_path`.
pub async fn upload(
    transport: &mut dyn Transport,
    task: &TransferTask,
    opts: &CopyOptions<'_>,
) -> Result<TransferOutcome, TransferError> {
    let clock = Instant::now();
    let mut local = fs::File::open(&task.local_path).await?;
    let total = local.metadata().await.ok().map(|m| m.len());

    let mut remote = transport.open_write(&task.remote_path).await?;
    let copied = copy_chunks(
        &mut local,
        Side::Local,
        &mut remote,
        Side::Remote,
        task,
        total,
        opts,
    )
    .await;
    let closed = match &copied {
        Ok(_) => remote.shutdown().await.map_err(|e| Side::Remote.error(e)),
        Err(_) => Ok(()),
    };
    drop(remote);
    drop(local);

    let finished = transport.finish_transfer().await;
    let (bytes, chunks) = copied?;
    closed?;
    finished?;

    Ok(outcome(task, bytes, chunks, clock))
}

// ─── DOWNLOAD (RETR) ─────────────────────────────────────────────────

/// Download `task.remote_path` into `task.local_path`, creating parent
/// directories as needed.
pub async fn download(
    transport: &mut dyn Transport,
    task: &TransferTask,
    opts: &CopyOptions<'_>,
) -> Result<TransferOutcome, TransferError> {
    let clock = Instant::now();
    // Best effort, for progress percentages.
    let total = if transport.features().size {
        transport.file_size(&task.remote_path).await.ok()
    } else {
        None
    };

    // RETR must be accepted before the local file is truncated.
    let mut remote = transport.open_read(&task.remote_path).await?;
    let mut local = match create_local(&task.local_path).await {
        Ok(file) => file,
        Err(e) => {
            drop(remote);
            if let Err(finish) = transport.finish_transfer().await {
                debug!("closing RETR after local error: {}", finish);
            }
            return Err(TransferError::LocalIo(e));
        }
    };

    let copied = copy_chunks(
        &mut remote,
        Side::Remote,
        &mut local,
        Side::Local,
        task,
        total,
        opts,
    )
    .await;
    drop(remote);
    drop(local);

    let finished = transport.finish_transfer().await;
    let (bytes, chunks) = copied?;
    finished?;

    Ok(outcome(task, bytes, chunks, clock))
}

async fn create_local(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::File::create(path).await
}

fn outcome(task: &TransferTask, bytes: u64, chunks: u64, clock: Instant) -> TransferOutcome {
    TransferOutcome {
        task_id: task.id.clone(),
        bytes_transferred: bytes,
        chunks,
        duration_ms: clock.elapsed().as_millis() as u64,
    }
}
