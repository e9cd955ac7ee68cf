//! The capability set a session needs from a protocol backend.
//!
//! `FtpClient` is the only implementation shipped here; other protocol
//! families plug in by implementing the same trait.

use crate::ftp::error::FtpResult;
use crate::ftp::trust::HandshakeGate;
use crate::ftp::types::{CommandReply, ConnectParams, FtpEntry, ServerFeatures};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Remote read side of a download.
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
/// Remote write side of an upload.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait::async_trait]
pub trait Transport: Send {
    /// Connect and log in. TLS handshakes consult `gate`.
    async fn connect(
        &mut self,
        params: &ConnectParams,
        gate: Arc<dyn HandshakeGate>,
    ) -> FtpResult<()>;

    /// Best effort; never fails.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn features(&self) -> ServerFeatures;

    async fn working_directory(&mut self) -> FtpResult<String>;

    async fn change_directory(&mut self, path: &str) -> FtpResult<()>;

    /// Start a download. Drain the reader, drop it, then call
    /// [`Transport::finish_transfer`].
    async fn open_read(&mut self, path: &str) -> FtpResult<RemoteReader>;

    /// Start an upload. Shut the writer down, drop it, then call
    /// [`Transport::finish_transfer`].
    async fn open_write(&mut self, path: &str) -> FtpResult<RemoteWriter>;

    /// Collect the server's verdict on the last opened stream.
    async fn finish_transfer(&mut self) -> FtpResult<()>;

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()>;

    async fn create_directory(&mut self, path: &str, recursive: bool) -> FtpResult<()>;

    async fn delete_file(&mut self, path: &str) -> FtpResult<()>;

    async fn delete_directory(&mut self, path: &str, recursive: bool) -> FtpResult<()>;

    async fn file_exists(&mut self, path: &str) -> FtpResult<bool>;

    async fn directory_exists(&mut self, path: &str) -> FtpResult<bool>;

    async fn file_size(&mut self, path: &str) -> FtpResult<u64>;

    async fn modified_time(&mut self, path: &str) -> FtpResult<DateTime<Utc>>;

    /// Send a command verbatim. Error replies are returned, not raised.
    async fn execute_raw(&mut self, command: &str) -> FtpResult<CommandReply>;

    /// Raw entries of `path`; `full_name` may be relative (`./name`).
    async fn listing(&mut self, path: &str) -> FtpResult<Vec<FtpEntry>>;
}
