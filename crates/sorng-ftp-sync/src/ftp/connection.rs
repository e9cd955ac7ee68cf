//! TCP + TLS transport: establishes the FTP control connection.
//!
//! Handles plain-TCP connect, implicit-FTPS wrapping, and the
//! connect timeout from `ConnectParams`.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::types::{ConnectParams, FtpResponse, FtpSecurityMode};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// Establish the control connection and return a ready-to-use codec
/// **plus** the server welcome banner.
///
/// For Explicit FTPS the caller issues AUTH TLS afterwards.
pub async fn connect(
    params: &ConnectParams,
    connector: Option<&TlsConnector>,
) -> FtpResult<(FtpCodec, FtpResponse)> {
    let addr = format!("{}:{}", params.host, params.port);
    let dur = Duration::from_secs(params.connect_timeout_sec.max(1));

    let tcp = timeout(dur, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;

    tcp.set_nodelay(true).ok();

    let mut codec = match (params.security, connector) {
        (FtpSecurityMode::Implicit, Some(connector)) => {
            let tls = tls::handshake(connector, &params.host, tcp, "Implicit").await?;
            FtpCodec::from_tls(tls)
        }
        (FtpSecurityMode::Implicit, None) => {
            return Err(FtpError::invalid_config(
                "Implicit FTPS requires a TLS connector",
            ))
        }
        _ => FtpCodec::from_tcp(tcp),
    };

    let banner = timeout(dur, codec.read_response())
        .await
        .map_err(|_| FtpError::timeout("Timed out waiting for the server greeting"))??;
    if !banner.is_completion() {
        return Err(FtpError::from_reply(banner.code, &banner.text()));
    }
    Ok((codec, banner))
}
