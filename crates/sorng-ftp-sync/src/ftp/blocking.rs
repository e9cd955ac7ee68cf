//! Blocking façade over [`TransferSession`] for callers without a runtime.
//!
//! Throttling pauses put the calling thread to sleep. A one-worker runtime
//! stays alive alongside so the keep-alive timer keeps firing while the
//! caller is idle.

use crate::ftp::error::{CommandError, ConnectError, TransferError};
use crate::ftp::rate_limit::Pacing;
use crate::ftp::session::TransferSession;
use crate::ftp::types::*;
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use tokio::runtime::{Builder, Runtime};

pub struct BlockingSession {
    inner: TransferSession,
    runtime: Runtime,
}

impl BlockingSession {
    pub fn new(inner: TransferSession) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ftp-sync-session")
            .enable_all()
            .build()?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped session, for use from async code.
    pub fn session(&self) -> &TransferSession {
        &self.inner
    }

    pub fn connect(&self, reconnecting: bool) -> Result<(), ConnectError> {
        self.runtime.block_on(self.inner.connect(reconnecting))
    }

    pub fn disconnect(&self) {
        self.runtime.block_on(self.inner.disconnect())
    }

    pub fn reconnect(&self) -> Result<(), ConnectError> {
        self.runtime.block_on(self.inner.reconnect())
    }

    pub fn send_keep_alive(&self) -> Result<KeepAliveOutcome, ConnectError> {
        self.runtime.block_on(self.inner.send_keep_alive())
    }

    pub fn transfer(&self, task: &TransferTask) -> Result<TransferOutcome, TransferError> {
        self.runtime
            .block_on(self.inner.transfer_with(task, Pacing::Blocking))
    }

    pub fn upload(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferOutcome, TransferError> {
        self.transfer(&TransferTask::upload(local_path.as_ref(), remote_path))
    }

    pub fn download(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferOutcome, TransferError> {
        self.transfer(&TransferTask::download(remote_path, local_path.as_ref()))
    }

    /// Safe to call from another thread while a transfer runs.
    pub fn cancel_transfer(&self) {
        self.inner.cancel_transfer()
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), CommandError> {
        self.runtime.block_on(self.inner.rename(from, to))
    }

    pub fn remove(&self, path: &str, kind: ItemKind) -> Result<(), CommandError> {
        self.runtime.block_on(self.inner.remove(path, kind))
    }

    pub fn make_folder(&self, path: &str) -> Result<(), CommandError> {
        self.runtime.block_on(self.inner.make_folder(path))
    }

    pub fn set_file_permissions(&self, path: &str, mode: u32) -> Result<(), CommandError> {
        self.runtime
            .block_on(self.inner.set_file_permissions(path, mode))
    }

    pub fn get_modified_time(&self, path: &str) -> Result<DateTime<Utc>, CommandError> {
        self.runtime.block_on(self.inner.get_modified_time(path))
    }

    pub fn set_modified_time(&self, path: &str, time: DateTime<Utc>) -> Result<(), CommandError> {
        self.runtime
            .block_on(self.inner.set_modified_time(path, time))
    }

    pub fn size_of(&self, path: &str) -> Result<u64, CommandError> {
        self.runtime.block_on(self.inner.size_of(path))
    }

    pub fn exists(&self, path: &str) -> Result<bool, CommandError> {
        self.runtime.block_on(self.inner.exists(path))
    }

    pub fn get_file_listing(&self, path: &str) -> Result<Vec<ListingEntry>, CommandError> {
        self.runtime.block_on(self.inner.get_file_listing(path))
    }

    pub fn change_directory(&self, path: &str) -> Result<(), CommandError> {
        self.runtime.block_on(self.inner.change_directory(path))
    }

    pub fn home_path(&self) -> Option<String> {
        self.runtime.block_on(self.inner.home_path())
    }

    pub fn working_directory(&self) -> Option<String> {
        self.runtime.block_on(self.inner.working_directory())
    }

    pub fn info(&self) -> SessionInfo {
        self.runtime.block_on(self.inner.info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::testing::{MockServer, MockTransport};
    use std::time::{Duration, Instant};

    fn blocking(server: &MockServer, config: SessionConfig) -> BlockingSession {
        let session = TransferSession::builder(config)
            .transport(Box::new(MockTransport::new(server)))
            .build();
        BlockingSession::new(session).unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            host: "mock.example".into(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn blocking_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"payload").unwrap();

        let server = MockServer::new();
        let s = blocking(&server, config());
        s.connect(false).unwrap();
        s.make_folder("/in").unwrap();
        s.upload(&local, "/in/a.txt").unwrap();
        let back = dir.path().join("back.txt");
        s.download("/in/a.txt", &back).unwrap();

        assert_eq!(std::fs::read(&back).unwrap(), b"payload");
        assert_eq!(s.size_of("/in/a.txt").unwrap(), 7);
        let listing = s.get_file_listing("/in").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, "/in/a.txt");
        s.disconnect();
    }

    #[test]
    fn blocking_transfers_sleep_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("big.bin");
        std::fs::write(&local, vec![0u8; 24_000]).unwrap();

        let server = MockServer::new();
        let s = blocking(
            &server,
            SessionConfig {
                upload_limit_kbps: 12,
                ..config()
            },
        );
        s.connect(false).unwrap();

        let start = Instant::now();
        s.upload(&local, "/big.bin").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1_900));
    }
}
