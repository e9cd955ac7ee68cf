//! Error types.
//!
//! `FtpError` is what the wire layer produces; the session reports the
//! narrower `ConnectError` / `TransferError` / `CommandError` taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP response code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS resolution failure.
    ConnectionFailed,
    /// AUTH TLS / TLS handshake failure, including a rejected certificate.
    TlsFailed,
    /// Wrong username/password.
    AuthFailed,
    /// Server returned a 4xx/5xx for a command.
    CommandRejected,
    /// Data channel could not be established (PASV/PORT failed).
    DataChannelFailed,
    /// Transfer aborted or incomplete.
    TransferFailed,
    /// Server sent an un-parseable response.
    ProtocolError,
    /// An I/O error on a socket.
    IoError,
    /// Operation timed out.
    Timeout,
    /// Session is disconnected / dropped.
    Disconnected,
    /// Permission denied on the server.
    PermissionDenied,
    /// File/directory not found on the server.
    NotFound,
    /// Server lacks the capability for this operation.
    Unsupported,
    /// Config / parameter validation error.
    InvalidConfig,
    /// Catch-all.
    Unknown,
}

impl FtpErrorKind {
    /// Failures that can be caused by the certificate negotiation.
    pub fn is_authentication(self) -> bool {
        matches!(self, FtpErrorKind::AuthFailed | FtpErrorKind::TlsFailed)
    }
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn command_rejected(code: u16, msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::CommandRejected, msg).with_code(code)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferFailed, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::NotFound, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Unsupported, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found") || lower.contains("no such") {
                    FtpErrorKind::NotFound
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            451 | 452 | 552 => FtpErrorKind::TransferFailed,
            500..=504 | 202 => FtpErrorKind::Unsupported,
            _ if code >= 400 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::Unknown,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
        }
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e))
        } else {
            Self::io_error(e.to_string())
        }
    }
}

impl From<FtpError> for String {
    fn from(e: FtpError) -> String {
        e.message
    }
}

// ── Session-level taxonomy ───────────────────────────────────────────

/// Why a session could not be established.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("server unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("server certificate rejected: {0}")]
    CertificateRejected(String),
}

impl ConnectError {
    /// Map a transport failure; `certificate_attached` tells whether the
    /// certificate retry has already been spent.
    pub fn from_transport(err: &FtpError, certificate_attached: bool) -> Self {
        match err.kind {
            FtpErrorKind::TlsFailed if certificate_attached => {
                ConnectError::CertificateRejected(err.message.clone())
            }
            FtpErrorKind::TlsFailed | FtpErrorKind::AuthFailed => {
                ConnectError::AuthenticationFailed(err.message.clone())
            }
            _ => ConnectError::NetworkUnreachable(err.message.clone()),
        }
    }
}

/// Why an upload or download failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),
    #[error("remote I/O error: {0}")]
    RemoteIo(#[from] FtpError),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("session is not connected")]
    NotConnected,
}

/// Why a non-transfer command failed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("not supported by the server: {0}")]
    Unsupported(String),
    #[error("server rejected the command: {0}")]
    ServerRejected(String),
    #[error("session is not connected")]
    NotConnected,
}

impl From<FtpError> for CommandError {
    fn from(e: FtpError) -> Self {
        match e.kind {
            FtpErrorKind::Unsupported => CommandError::Unsupported(e.message),
            FtpErrorKind::Disconnected => CommandError::NotConnected,
            _ => CommandError::ServerRejected(e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_530_is_auth_failure() {
        let e = FtpError::from_reply(530, "530 Login incorrect.");
        assert_eq!(e.kind, FtpErrorKind::AuthFailed);
        assert!(e.kind.is_authentication());
        assert_eq!(e.code, Some(530));
    }

    #[test]
    fn reply_550_is_classified_by_text() {
        assert_eq!(
            FtpError::from_reply(550, "550 Permission denied").kind,
            FtpErrorKind::PermissionDenied
        );
        assert_eq!(
            FtpError::from_reply(550, "550 No such file or directory").kind,
            FtpErrorKind::NotFound
        );
        assert_eq!(
            FtpError::from_reply(550, "550 Failed").kind,
            FtpErrorKind::CommandRejected
        );
    }

    #[test]
    fn unknown_command_is_unsupported() {
        assert_eq!(
            FtpError::from_reply(502, "502 Command not implemented").kind,
            FtpErrorKind::Unsupported
        );
    }

    #[test]
    fn display_includes_code() {
        let e = FtpError::command_rejected(553, "bad name");
        assert_eq!(e.to_string(), "[FTP CommandRejected 553] bad name");
    }

    #[test]
    fn tls_failure_after_attachment_is_certificate_rejection() {
        let e = FtpError::tls_failed("handshake rejected");
        assert_eq!(
            ConnectError::from_transport(&e, true),
            ConnectError::CertificateRejected("handshake rejected".into())
        );
        assert_eq!(
            ConnectError::from_transport(&e, false),
            ConnectError::AuthenticationFailed("handshake rejected".into())
        );
    }

    #[test]
    fn network_failures_map_to_unreachable() {
        let e = FtpError::connection_failed("refused");
        assert!(matches!(
            ConnectError::from_transport(&e, false),
            ConnectError::NetworkUnreachable(_)
        ));
    }

    #[test]
    fn command_error_from_ftp_error() {
        assert_eq!(
            CommandError::from(FtpError::unsupported("no MFMT")),
            CommandError::Unsupported("no MFMT".into())
        );
        assert_eq!(
            CommandError::from(FtpError::from_reply(550, "550 Nope")),
            CommandError::ServerRejected("550 Nope".into())
        );
    }
}
