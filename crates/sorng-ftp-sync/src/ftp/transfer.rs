//! Data-channel management for FTP transfers.
//!
//! Supports four modes (RFC 959 + RFC 2428):
//! - **PASV**: server opens a port, client connects
//! - **EPSV**: extended passive (IPv6-ready)
//! - **PORT**: client opens a port, tells server
//! - **EPRT**: extended active (IPv6-ready)
//!
//! Opening is split in two: [`prepare_data_channel`] negotiates the
//! address before the transfer command is sent, [`complete_data_channel`]
//! accepts (active modes) and TLS-wraps (PROT P) once the server has
//! answered the command with a preliminary reply.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::types::DataChannelMode;
use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

lazy_static! {
    static ref PASV_RE: Regex =
        Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").expect("valid PASV regex");
    static ref EPSV_RE: Regex = Regex::new(r"\|\|\|(\d+)\|").expect("valid EPSV regex");
}

/// Abstraction over a plain or TLS-wrapped data stream.
pub enum DataStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for DataStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            // Servers often close data channels without close_notify.
            DataStream::Tls(s) => match Pin::new(s.as_mut()).poll_read(cx, buf) {
                Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    Poll::Ready(Ok(()))
                }
                other => other,
            },
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A negotiated but not yet usable data channel.
pub enum PendingDataChannel {
    /// Already connected to the server's passive port.
    Connected(TcpStream),
    /// Waiting for the server to connect back.
    Listening(TcpListener),
}

/// Negotiate a data channel according to the configured mode.
pub async fn prepare_data_channel(
    codec: &mut FtpCodec,
    mode: DataChannelMode,
    host: &str,
    data_timeout: Duration,
    active_bind: Option<&str>,
) -> FtpResult<PendingDataChannel> {
    Ok(match mode {
        DataChannelMode::Passive => {
            PendingDataChannel::Connected(open_pasv(codec, data_timeout).await?)
        }
        DataChannelMode::ExtendedPassive => {
            PendingDataChannel::Connected(open_epsv(codec, host, data_timeout).await?)
        }
        DataChannelMode::Active => PendingDataChannel::Listening(open_port(codec, active_bind).await?),
        DataChannelMode::ExtendedActive => {
            PendingDataChannel::Listening(open_eprt(codec, active_bind).await?)
        }
    })
}

/// Finish opening the channel after the transfer command was accepted.
pub async fn complete_data_channel(
    pending: PendingDataChannel,
    host: &str,
    data_timeout: Duration,
    connector: Option<&TlsConnector>,
) -> FtpResult<DataStream> {
    let tcp = match pending {
        PendingDataChannel::Connected(tcp) => tcp,
        PendingDataChannel::Listening(listener) => {
            let (tcp, _) = timeout(data_timeout, listener.accept())
                .await
                .map_err(|_| FtpError::data_channel("Active data accept timed out"))?
                .map_err(|e| FtpError::data_channel(format!("Active data accept: {}", e)))?;
            tcp
        }
    };

    match connector {
        Some(connector) => {
            let tls = tls::wrap_data_stream(tcp, host, connector).await?;
            Ok(DataStream::Tls(Box::new(tls)))
        }
        None => Ok(DataStream::Plain(tcp)),
    }
}

// ─── PASV ────────────────────────────────────────────────────────────

/// Issue `PASV`, parse the response, connect to the returned address.
///
/// Response format: `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
async fn open_pasv(codec: &mut FtpCodec, data_timeout: Duration) -> FtpResult<TcpStream> {
    let resp = codec.expect_ok("PASV").await?;
    let addr = parse_pasv_response(&resp.text())?;
    connect_data(addr.to_string(), data_timeout, "PASV").await
}

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 response.
fn parse_pasv_response(text: &str) -> FtpResult<SocketAddr> {
    let caps = PASV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV: {}", text)))?;

    let nums: Vec<u8> = (1..=6)
        .map(|i| {
            caps[i]
                .parse::<u8>()
                .map_err(|_| FtpError::protocol_error("PASV number out of range"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ip = IpAddr::from([nums[0], nums[1], nums[2], nums[3]]);
    let port = (nums[4] as u16) * 256 + (nums[5] as u16);
    Ok(SocketAddr::new(ip, port))
}

// ─── EPSV ────────────────────────────────────────────────────────────

/// Issue `EPSV`, parse port, connect to the *same host* on that port.
///
/// Response format: `229 Entering Extended Passive Mode (|||port|)`
async fn open_epsv(
    codec: &mut FtpCodec,
    host: &str,
    data_timeout: Duration,
) -> FtpResult<TcpStream> {
    let resp = codec.expect_ok("EPSV").await?;
    let port = parse_epsv_response(&resp.text())?;
    connect_data(format!("{}:{}", host, port), data_timeout, "EPSV").await
}

fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let caps = EPSV_RE
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse EPSV: {}", text)))?;
    caps[1]
        .parse::<u16>()
        .map_err(|_| FtpError::protocol_error("EPSV port out of range"))
}

async fn connect_data(addr: String, data_timeout: Duration, what: &str) -> FtpResult<TcpStream> {
    timeout(data_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| FtpError::data_channel(format!("{} data connect timed out", what)))?
        .map_err(|e| FtpError::data_channel(format!("{} data connect to {}: {}", what, addr, e)))
}

// ─── PORT / EPRT ─────────────────────────────────────────────────────

async fn bind_active(bind_addr: Option<&str>, what: &str) -> FtpResult<(TcpListener, SocketAddr)> {
    let bind = bind_addr.unwrap_or("0.0.0.0");
    let listener = TcpListener::bind(format!("{}:0", bind))
        .await
        .map_err(|e| FtpError::data_channel(format!("{} bind: {}", what, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FtpError::data_channel(format!("{} local_addr: {}", what, e)))?;
    Ok((listener, local))
}

/// Bind a local TCP listener and announce it via `PORT`.
async fn open_port(codec: &mut FtpCodec, bind_addr: Option<&str>) -> FtpResult<TcpListener> {
    let (listener, local) = bind_active(bind_addr, "PORT").await?;
    codec.expect_ok(&format_port_command(local)?).await?;
    Ok(listener)
}

fn format_port_command(local: SocketAddr) -> FtpResult<String> {
    let ip = match local.ip() {
        IpAddr::V4(v4) => v4,
        _ => return Err(FtpError::data_channel("PORT requires IPv4")),
    };
    let o = ip.octets();
    let port = local.port();
    Ok(format!(
        "PORT {},{},{},{},{},{}",
        o[0],
        o[1],
        o[2],
        o[3],
        port / 256,
        port % 256
    ))
}

/// Bind a local listener and announce it via `EPRT |af|ip|port|`.
async fn open_eprt(codec: &mut FtpCodec, bind_addr: Option<&str>) -> FtpResult<TcpListener> {
    let (listener, local) = bind_active(bind_addr, "EPRT").await?;
    let af = match local.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    };
    let cmd = format!("EPRT |{}|{}|{}|", af, local.ip(), local.port());
    codec.expect_ok(&cmd).await?;
    Ok(listener)
}
