//! Stateful FTP client: owns the control connection and issues commands.
//!
//! Lifecycle: `connect()` → optional TLS upgrade → authenticate →
//! FEAT probing → `OPTS UTF8` → `TYPE I`.
//!
//! The client exposes low-level command helpers used by `directory.rs`
//! and implements [`Transport`] for the session layer.

use crate::ftp::connection;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::parser;
use crate::ftp::protocol::FtpCodec;
use crate::ftp::tls;
use crate::ftp::transfer::{self, DataStream};
use crate::ftp::transport::{RemoteReader, RemoteWriter, Transport};
use crate::ftp::trust::HandshakeGate;
use crate::ftp::types::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_rustls::TlsConnector;
use uuid::Uuid;

/// Control connection plus everything negotiated on it.
pub(crate) struct Connected {
    pub codec: FtpCodec,
    pub params: ConnectParams,
    /// Present when the data channels must be protected.
    pub tls: Option<TlsConnector>,
    pub features: ServerFeatures,
    /// A data transfer is waiting for its completion reply.
    pub transfer_open: bool,
}

/// An FTP client. Created disconnected; see [`Transport::connect`].
pub struct FtpClient {
    pub id: String,
    prefer_mlsd: bool,
    pub(crate) conn: Option<Connected>,
}

impl FtpClient {
    pub fn new(prefer_mlsd: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prefer_mlsd,
            conn: None,
        }
    }

    pub(crate) fn conn(&mut self) -> FtpResult<&mut Connected> {
        self.conn
            .as_mut()
            .ok_or_else(|| FtpError::disconnected("Not connected"))
    }

    pub(crate) fn codec(&mut self) -> FtpResult<&mut FtpCodec> {
        Ok(&mut self.conn()?.codec)
    }

    /// Send a command; a 421 or a dead socket drops the connection.
    pub(crate) async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let result = self.codec()?.execute(cmd).await;
        self.note_liveness(result)
    }

    pub(crate) async fn expect_ok(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        if !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }
        Ok(resp)
    }

    fn note_liveness(&mut self, result: FtpResult<FtpResponse>) -> FtpResult<FtpResponse> {
        let lost = match &result {
            Ok(r) => r.code == 421,
            Err(e) => matches!(
                e.kind,
                FtpErrorKind::Disconnected | FtpErrorKind::IoError | FtpErrorKind::Timeout
            ),
        };
        if lost {
            log::debug!("[{}] control connection lost", self.id);
            self.conn = None;
        }
        result
    }

    // ─── Login sequence ──────────────────────────────────────────

    async fn establish(
        params: &ConnectParams,
        gate: Arc<dyn HandshakeGate>,
    ) -> FtpResult<Connected> {
        let connector = if params.security.is_secure() {
            Some(tls::build_tls_connector(gate)?)
        } else {
            None
        };

        let (mut codec, _greeting) = connection::connect(params, connector.as_ref()).await?;

        // ── Explicit FTPS: AUTH TLS ──────────────────────────────
        if params.security == FtpSecurityMode::Explicit {
            let resp = codec.execute("AUTH TLS").await?;
            if !resp.is_completion() {
                return Err(FtpError::tls_failed(format!(
                    "AUTH TLS rejected: {}",
                    resp.text()
                )));
            }
            if let Some(connector) = connector.as_ref() {
                codec = tls::upgrade_to_tls(codec, &params.host, connector).await?;
            }
        }

        // ── Authenticate ─────────────────────────────────────────
        let user_resp = codec.execute(&format!("USER {}", params.username)).await?;
        if user_resp.code == 331 {
            let pass_resp = codec.execute(&format!("PASS {}", params.password)).await?;
            if !pass_resp.is_completion() {
                return Err(FtpError::auth_failed(format!(
                    "Login failed: {}",
                    pass_resp.text()
                ))
                .with_code(pass_resp.code));
            }
        } else if !user_resp.is_completion() {
            return Err(FtpError::auth_failed(format!(
                "USER rejected: {}",
                user_resp.text()
            ))
            .with_code(user_resp.code));
        }

        // ── Protection level ─────────────────────────────────────
        if params.security.is_secure() {
            codec.expect_ok("PBSZ 0").await?;
            codec.expect_ok("PROT P").await?;
        }

        // ── FEAT ─────────────────────────────────────────────────
        let features = match codec.execute("FEAT").await {
            Ok(r) if r.is_completion() => parse_features(&r),
            _ => ServerFeatures::default(),
        };

        if params.utf8 && features.utf8 {
            let _ = codec.execute("OPTS UTF8 ON").await;
        }

        codec.expect_ok("TYPE I").await?;

        Ok(Connected {
            codec,
            params: params.clone(),
            tls: connector,
            features,
            transfer_open: false,
        })
    }

    // ─── PWD / CWD ───────────────────────────────────────────────

    pub async fn pwd(&mut self) -> FtpResult<String> {
        let resp = self.expect_ok("PWD").await?;
        parse_pwd(&resp.text())
    }

    pub async fn cwd(&mut self, path: &str) -> FtpResult<()> {
        self.expect_ok(&format!("CWD {}", path)).await?;
        Ok(())
    }

    // ─── Data channel helper ─────────────────────────────────────

    /// Negotiate a data channel, send `cmd`, and return the open stream.
    async fn start_data_command(&mut self, cmd: &str) -> FtpResult<DataStream> {
        let conn = self.conn()?;
        if conn.transfer_open {
            return Err(FtpError::protocol_error(
                "Previous transfer was not finished",
            ));
        }
        let data_timeout = Duration::from_secs(conn.params.data_timeout_sec.max(1));
        let pending = transfer::prepare_data_channel(
            &mut conn.codec,
            conn.params.data_channel_mode,
            &conn.params.host,
            data_timeout,
            conn.params.active_bind_address.as_deref(),
        )
        .await?;

        let resp = conn.codec.execute(cmd).await?;
        if !resp.is_preliminary() && !resp.is_completion() {
            return Err(FtpError::from_reply(resp.code, &resp.text()));
        }

        let ds = transfer::complete_data_channel(
            pending,
            &conn.params.host,
            data_timeout,
            conn.tls.as_ref(),
        )
        .await?;
        conn.transfer_open = resp.is_preliminary();
        Ok(ds)
    }

    async fn complete_data_command(&mut self) -> FtpResult<()> {
        let conn = self.conn()?;
        if !std::mem::take(&mut conn.transfer_open) {
            return Ok(());
        }
        let done = conn.codec.read_response().await?;
        if !done.is_completion() {
            return Err(FtpError::from_reply(done.code, &done.text()));
        }
        Ok(())
    }

    /// Open a data channel, send `cmd`, collect the body as a String.
    pub async fn retrieve_data_as_string(&mut self, cmd: &str) -> FtpResult<String> {
        let mut ds = self.start_data_command(cmd).await?;
        let mut buf = Vec::new();
        let read = ds.read_to_end(&mut buf).await;
        drop(ds);
        self.complete_data_command().await?;
        read?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// Retrieve a directory listing (prefers MLSD, falls back to LIST).
    pub async fn list(&mut self, path: &str) -> FtpResult<Vec<FtpEntry>> {
        let use_mlsd = self.prefer_mlsd && self.conn()?.features.mlsd;
        let verb = if use_mlsd { "MLSD" } else { "LIST" };
        let cmd = match path.trim() {
            "" => verb.to_string(),
            p => format!("{} {}", verb, p),
        };
        let data = self.retrieve_data_as_string(&cmd).await?;
        Ok(parser::parse_listing_at(&data, path))
    }

    // ─── SIZE / MDTM ─────────────────────────────────────────────

    /// Size of a remote file (RFC 3659 SIZE).
    pub async fn size(&mut self, path: &str) -> FtpResult<u64> {
        let resp = self.expect_ok(&format!("SIZE {}", path)).await?;
        resp.message()
            .parse::<u64>()
            .map_err(|_| FtpError::protocol_error(format!("Cannot parse SIZE: {}", resp.text())))
    }

    /// Modification time of a remote file (RFC 3659 MDTM).
    pub async fn mdtm(&mut self, path: &str) -> FtpResult<DateTime<Utc>> {
        let resp = self.expect_ok(&format!("MDTM {}", path)).await?;
        parser::parse_mlsd_time(&resp.message())
            .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse MDTM: {}", resp.text())))
    }

    // ─── QUIT ────────────────────────────────────────────────────

    /// Gracefully close the session.
    pub async fn quit(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), conn.codec.execute("QUIT")).await;
            conn.codec.shutdown().await;
            log::info!("[{}] disconnected from {}", self.id, conn.params.host);
        }
    }
}

#[async_trait::async_trait]
impl Transport for FtpClient {
    async fn connect(
        &mut self,
        params: &ConnectParams,
        gate: Arc<dyn HandshakeGate>,
    ) -> FtpResult<()> {
        if params.host.trim().is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        self.quit().await;
        let conn = Self::establish(params, gate).await?;
        log::info!(
            "[{}] connected to {}:{} ({:?})",
            self.id,
            params.host,
            params.port,
            params.security
        );
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.quit().await;
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn features(&self) -> ServerFeatures {
        self.conn
            .as_ref()
            .map(|c| c.features.clone())
            .unwrap_or_default()
    }

    async fn working_directory(&mut self) -> FtpResult<String> {
        self.pwd().await
    }

    async fn change_directory(&mut self, path: &str) -> FtpResult<()> {
        self.cwd(path).await
    }

    async fn open_read(&mut self, path: &str) -> FtpResult<RemoteReader> {
        let ds = self.start_data_command(&format!("RETR {}", path)).await?;
        Ok(Box::new(ds))
    }

    async fn open_write(&mut self, path: &str) -> FtpResult<RemoteWriter> {
        let ds = self.start_data_command(&format!("STOR {}", path)).await?;
        Ok(Box::new(ds))
    }

    async fn finish_transfer(&mut self) -> FtpResult<()> {
        self.complete_data_command().await
    }

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.rename_path(from, to).await
    }

    async fn create_directory(&mut self, path: &str, recursive: bool) -> FtpResult<()> {
        if recursive {
            self.mkdir_all(path).await
        } else {
            self.mkdir(path).await.map(|_| ())
        }
    }

    async fn delete_file(&mut self, path: &str) -> FtpResult<()> {
        self.delete(path).await
    }

    async fn delete_directory(&mut self, path: &str, recursive: bool) -> FtpResult<()> {
        if recursive {
            self.rmdir_recursive(path).await
        } else {
            self.rmdir(path).await
        }
    }

    async fn file_exists(&mut self, path: &str) -> FtpResult<bool> {
        if self.conn()?.features.size {
            match self.size(path).await {
                Ok(_) => return Ok(true),
                Err(e) if e.kind == FtpErrorKind::NotFound || e.code == Some(550) => {
                    return Ok(false)
                }
                Err(e) if e.kind == FtpErrorKind::Disconnected => return Err(e),
                Err(_) => {}
            }
        }
        let (parent, name) = split_parent(path);
        let entries = match self.list(parent).await {
            Ok(e) => e,
            Err(e) if e.code == Some(550) || e.kind == FtpErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(entries
            .iter()
            .any(|e| e.name == name && e.kind != FtpEntryKind::Directory))
    }

    async fn directory_exists(&mut self, path: &str) -> FtpResult<bool> {
        let here = self.pwd().await?;
        match self.cwd(path).await {
            Ok(()) => {
                self.cwd(&here).await?;
                Ok(true)
            }
            Err(e) if e.kind == FtpErrorKind::Disconnected => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn file_size(&mut self, path: &str) -> FtpResult<u64> {
        self.size(path).await
    }

    async fn modified_time(&mut self, path: &str) -> FtpResult<DateTime<Utc>> {
        self.mdtm(path).await
    }

    async fn execute_raw(&mut self, command: &str) -> FtpResult<CommandReply> {
        Ok(self.execute(command).await?.into())
    }

    async fn listing(&mut self, path: &str) -> FtpResult<Vec<FtpEntry>> {
        self.list(path).await
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Parse a FEAT reply into capability flags.
pub fn parse_features(resp: &FtpResponse) -> ServerFeatures {
    let raw: Vec<String> = resp
        .lines
        .iter()
        .skip(1) // "211-Features:"
        .filter(|l| !l.starts_with("211"))
        .map(|l| l.trim().to_uppercase())
        .collect();

    let has = |feat: &str| {
        raw.iter()
            .any(|l| l == feat || l.starts_with(&format!("{} ", feat)))
    };

    ServerFeatures {
        mlsd: has("MLSD") || has("MLST"),
        mlst: has("MLST"),
        size: has("SIZE"),
        mdtm: has("MDTM"),
        utf8: has("UTF8"),
        epsv: has("EPSV"),
        eprt: has("EPRT"),
        auth_tls: raw.iter().any(|l| l.starts_with("AUTH") && l.contains("TLS")),
        mfmt: has("MFMT"),
        mff: has("MFF"),
        raw_features: raw,
    }
}

/// Parse `257 "/some/path"` into the path string.
fn parse_pwd(text: &str) -> FtpResult<String> {
    if let Some(start) = text.find('"') {
        if let Some(end) = text[start + 1..].find('"') {
            return Ok(text[start + 1..start + 1 + end].to_string());
        }
    }
    Err(FtpError::protocol_error(format!("Cannot parse PWD: {}", text)))
}

/// `/a/b/c.txt` → (`/a/b`, `c.txt`); `c.txt` → (``, `c.txt`).
pub(crate) fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    }
}
