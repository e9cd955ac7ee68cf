//! Shared types for the FTP sync transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ─── Connection / Session ────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSecurityMode {
    /// Plain-text FTP (port 21).
    None,
    /// Explicit FTPS: starts plain then upgrades via AUTH TLS (port 21).
    Explicit,
    /// Implicit FTPS: TLS from the first byte (port 990).
    Implicit,
}

impl Default for FtpSecurityMode {
    fn default() -> Self {
        Self::None
    }
}

impl FtpSecurityMode {
    pub fn is_secure(self) -> bool {
        self != Self::None
    }
}

/// Transfer mode selected for the data channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataChannelMode {
    Passive,
    ExtendedPassive,
    Active,
    ExtendedActive,
}

impl Default for DataChannelMode {
    fn default() -> Self {
        Self::Passive
    }
}

/// Configuration for one sync account's transfer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub security: FtpSecurityMode,
    #[serde(default)]
    pub data_channel_mode: DataChannelMode,
    /// Remote directory the sync engine treats as its root.
    #[serde(default = "default_root")]
    pub remote_root: String,
    /// Directory to CWD into after login ("/" or empty = stay in home).
    #[serde(default)]
    pub remote_working_directory: Option<String>,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// Data-channel timeout in seconds.
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
    /// Seconds between keep-alive NOOPs (0 = disabled).
    #[serde(default)]
    pub keepalive_interval_sec: u64,
    /// Upload ceiling in KB/s (<= 0 = unlimited).
    #[serde(default)]
    pub upload_limit_kbps: i64,
    /// Download ceiling in KB/s (<= 0 = unlimited).
    #[serde(default)]
    pub download_limit_kbps: i64,
    /// Chunk size for streamed reads/writes (bytes).
    #[serde(default = "default_chunk")]
    pub chunk_size: usize,
    /// Prefer MLSD over LIST when the server advertises it.
    #[serde(default = "default_true")]
    pub prefer_mlsd: bool,
    /// UTF-8 encoding (OPTS UTF8 ON).
    #[serde(default = "default_true")]
    pub utf8: bool,
    /// Local address to bind for active-mode data connections.
    #[serde(default)]
    pub active_bind_address: Option<String>,
}

fn default_port() -> u16 {
    21
}
fn default_username() -> String {
    "anonymous".into()
}
fn default_root() -> String {
    "/".into()
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_data_timeout() -> u64 {
    30
}
fn default_chunk() -> usize {
    8 * 1024
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: "anonymous@".into(),
            security: FtpSecurityMode::None,
            data_channel_mode: DataChannelMode::Passive,
            remote_root: default_root(),
            remote_working_directory: None,
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
            keepalive_interval_sec: 0,
            upload_limit_kbps: 0,
            download_limit_kbps: 0,
            chunk_size: default_chunk(),
            prefer_mlsd: true,
            utf8: true,
            active_bind_address: None,
        }
    }
}

impl SessionConfig {
    /// Conventional port for a security mode.
    pub fn default_port_for(security: FtpSecurityMode) -> u16 {
        match security {
            FtpSecurityMode::Implicit => 990,
            _ => 21,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("Host must not be empty".into());
        }
        if self.port == 0 {
            return Err("Port must be non-zero".into());
        }
        if self.chunk_size == 0 {
            return Err("Chunk size must be non-zero".into());
        }
        Ok(())
    }

    /// Limit that applies to a transfer direction.
    pub fn limit_for(&self, direction: TransferDirection) -> i64 {
        match direction {
            TransferDirection::Upload => self.upload_limit_kbps,
            TransferDirection::Download => self.download_limit_kbps,
        }
    }

    /// Configured remote working directory, if it is anything but the root.
    pub fn working_directory_override(&self) -> Option<&str> {
        self.remote_working_directory
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty() && *d != "/")
    }
}

/// Session lifecycle.
///
/// `Connecting → AwaitingCertificateDecision → Retrying` is walked at
/// most once per externally triggered connect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectState {
    Disconnected,
    Connecting,
    AwaitingCertificateDecision,
    Retrying,
    Connected,
    Failed,
}

/// Parameters handed to the transport for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub security: FtpSecurityMode,
    pub data_channel_mode: DataChannelMode,
    pub connect_timeout_sec: u64,
    pub data_timeout_sec: u64,
    pub utf8: bool,
    pub active_bind_address: Option<String>,
    /// Certificates captured earlier in this run and offered again.
    pub client_certificates: Vec<ServerCertificate>,
}

impl ConnectParams {
    pub fn from_config(config: &SessionConfig, client_certificates: Vec<ServerCertificate>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            security: config.security,
            data_channel_mode: config.data_channel_mode,
            connect_timeout_sec: config.connect_timeout_sec,
            data_timeout_sec: config.data_timeout_sec,
            utf8: config.utf8,
            active_bind_address: config.active_bind_address.clone(),
            client_certificates,
        }
    }

    pub fn has_client_certificate(&self) -> bool {
        !self.client_certificates.is_empty()
    }
}

// ─── Certificates / trust ────────────────────────────────────────────

/// A certificate presented by the server during a TLS handshake.
///
/// Only `fingerprint` takes part in trust decisions; the remaining
/// fields are shown to whoever is asked to confirm it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerCertificate {
    /// SHA-256 of the DER encoding, lowercase hex.
    pub fingerprint: String,
    pub serial: Option<String>,
    pub signature_algorithm: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

impl ServerCertificate {
    /// Certificate known only by its fingerprint.
    pub fn from_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            serial: None,
            signature_algorithm: None,
            valid_from: None,
            valid_to: None,
            issuer: None,
            subject: None,
        }
    }
}

/// Answer of an interactive certificate validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ValidatorVerdict {
    Trusted,
    Rejected,
}

/// Outcome of evaluating a presented certificate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrustDecision {
    /// Already trusted (persisted list, accepted this session, or no validator).
    AutoTrusted,
    /// First sighting without a client certificate: captured, attempt rejected.
    PendingFirstUse,
    /// Delegated to the external validator.
    UserPrompted(ValidatorVerdict),
}

impl TrustDecision {
    pub fn accepts(self) -> bool {
        matches!(
            self,
            TrustDecision::AutoTrusted | TrustDecision::UserPrompted(ValidatorVerdict::Trusted)
        )
    }
}

// ─── Directory Listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One entry from a directory listing (parsed from LIST or MLSD output).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEntry {
    pub name: String,
    /// Full path as derived from the listed path; may be `./name`.
    #[serde(default)]
    pub full_name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
    /// Raw line from the server (for debugging).
    pub raw: Option<String>,
    /// MLSD fact map (e.g. "type" → "file", "size" → "1234").
    #[serde(default)]
    pub facts: HashMap<String, String>,
}

/// Entry type exposed to the sync engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ItemKind {
    File,
    Folder,
    Other,
}

impl From<FtpEntryKind> for ItemKind {
    fn from(kind: FtpEntryKind) -> Self {
        match kind {
            FtpEntryKind::File => ItemKind::File,
            FtpEntryKind::Directory => ItemKind::Folder,
            FtpEntryKind::Symlink | FtpEntryKind::Unknown => ItemKind::Other,
        }
    }
}

/// A normalised listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingEntry {
    pub name: String,
    /// Canonical absolute path.
    pub path: String,
    pub kind: ItemKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Permission bits, when the server reports them.
    pub permissions: Option<String>,
}

// ─── Transfers ───────────────────────────────────────────────────────

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// One upload or download request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: TransferDirection,
}

impl TransferTask {
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: TransferDirection::Upload,
        }
    }

    pub fn download(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: TransferDirection::Download,
        }
    }
}

/// Emitted after every chunk of a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: String,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    /// Bytes moved by this chunk.
    pub chunk_bytes: u64,
    /// Bytes moved since the transfer started.
    pub transferred_bytes: u64,
    /// Size of the source, when known.
    pub total_bytes: Option<u64>,
    pub started_at: DateTime<Utc>,
}

/// Summary of a finished transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub task_id: String,
    pub bytes_transferred: u64,
    pub chunks: u64,
    pub duration_ms: u64,
}

/// Status of a tracked transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferState {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Live progress snapshot for a single transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub task_id: String,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub transferred_bytes: u64,
    pub speed_bps: u64,
    pub eta_seconds: Option<u64>,
    pub percent: f32,
    pub total_bytes: Option<u64>,
    pub state: TransferState,
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single FTP response (may be multi-line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full response text (all lines joined).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Text of the final line without the reply code.
    pub fn message(&self) -> String {
        self.lines
            .last()
            .map(|l| l.get(4..).unwrap_or("").trim().to_string())
            .unwrap_or_default()
    }

    /// Whether the response code indicates success (1xx–3xx).
    pub fn is_success(&self) -> bool {
        self.code < 400
    }

    /// Whether this is a positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this is a positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// Reply to a raw command, as seen by callers of the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub success: bool,
    pub code: u16,
    pub message: String,
}

impl From<FtpResponse> for CommandReply {
    fn from(resp: FtpResponse) -> Self {
        Self {
            success: resp.is_completion(),
            code: resp.code,
            message: resp.text(),
        }
    }
}

// ─── Server Capabilities ─────────────────────────────────────────────

/// Parsed FEAT response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub mlst: bool,
    pub size: bool,
    pub mdtm: bool,
    pub utf8: bool,
    pub epsv: bool,
    pub eprt: bool,
    pub auth_tls: bool,
    pub mfmt: bool,
    pub mff: bool,
    pub raw_features: Vec<String>,
}

/// Session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub security: FtpSecurityMode,
    pub state: ConnectState,
    pub home_path: Option<String>,
    pub working_directory: Option<String>,
    pub trusted_this_run: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

/// Result of a keep-alive request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum KeepAliveOutcome {
    Sent,
    /// A transfer holds the session.
    Skipped,
    /// NOOP failed and the session reconnected.
    Reconnected,
}
