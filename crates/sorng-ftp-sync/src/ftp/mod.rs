//! # FTP sync transport
//!
//! FTP/FTPS (RFC 959, 2228/4217, 2389, 2428, 3659) backend for the sync
//! engine.
//!
//! Architecture:
//! - `types`: data structures, enums, config
//! - `error`: wire-level `FtpError` and the session error taxonomy
//! - `protocol`: control channel command/response codec
//! - `connection`: TCP connect, implicit TLS, greeting
//! - `tls`: rustls verifier wired to the trust gate, AUTH TLS upgrade
//! - `transfer`: data channels (PASV/EPSV/PORT/EPRT)
//! - `parser`: Unix/Windows/MLSD listing parsing
//! - `client`: `FtpClient`, the concrete `Transport`
//! - `directory`: recursive mkdir/rmdir, rename, delete
//! - `transport`: capability trait the session drives
//! - `trust`: fingerprint persistence, validator, handshake gate
//! - `rate_limit`: per-chunk bandwidth throttling
//! - `paths`: listing path normalisation
//! - `progress`: session observer, progress board
//! - `file_ops`: the chunked copy behind every upload and download
//! - `keepalive`: background NOOP timer
//! - `session`: `TransferSession`
//! - `blocking`: `BlockingSession`

pub mod types;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod tls;
pub mod transfer;
pub mod parser;
pub mod client;
pub mod directory;
pub mod transport;
pub mod trust;
pub mod rate_limit;
pub mod paths;
pub mod progress;
pub mod file_ops;
mod keepalive;
pub mod session;
pub mod blocking;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use error::{CommandError, ConnectError, FtpError, FtpErrorKind, FtpResult, TransferError};
pub use blocking::BlockingSession;
pub use client::FtpClient;
pub use progress::{NoopObserver, ProgressBoard, SessionObserver};
pub use session::{SessionBuilder, TransferSession};
pub use transport::Transport;
pub use trust::{
    CertificateValidator, FingerprintStore, JsonFingerprintFile, MemoryFingerprintStore,
    TrustStore,
};
