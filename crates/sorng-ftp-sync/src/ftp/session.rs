//! Transfer session: connection lifecycle with trust-on-first-use, throttled
//! transfers, capability-gated commands and normalised listings.
//!
//! All state sits behind one async mutex. A transfer holds it for its whole
//! duration, which is what keeps keep-alive NOOPs off a busy channel.

use crate::ftp::client::{split_parent, FtpClient};
use crate::ftp::error::{CommandError, ConnectError, FtpError, FtpErrorKind, FtpResult, TransferError};
use crate::ftp::file_ops::{self, CopyOptions};
use crate::ftp::keepalive::spawn_keepalive;
use crate::ftp::paths;
use crate::ftp::progress::{NoopObserver, SessionObserver};
use crate::ftp::rate_limit::Pacing;
use crate::ftp::transport::Transport;
use crate::ftp::trust::{normalize_fingerprint, CertificateGate, CertificateValidator, TrustStore};
use crate::ftp::types::*;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Extra connect attempts allowed once a first-use certificate was captured.
const MAX_CERTIFICATE_RETRIES: u8 = 1;

// ─── Builder ─────────────────────────────────────────────────────────

/// Assembles a [`TransferSession`].
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    trust: Option<Arc<TrustStore>>,
    validator: Option<Arc<dyn CertificateValidator>>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            trust: None,
            validator: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Protocol backend. Defaults to [`FtpClient`].
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Process-wide trust list. Defaults to an empty in-memory one.
    pub fn trust_store(mut self, trust: Arc<TrustStore>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Interactive prompt for certificates that are not yet trusted.
    pub fn validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> TransferSession {
        let prefer_mlsd = self.config.prefer_mlsd;
        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(FtpClient::new(prefer_mlsd)) as Box<dyn Transport>);
        let trust = self.trust.unwrap_or_else(|| TrustStore::in_memory().shared());
        let id = uuid::Uuid::new_v4().to_string();

        let core = SessionCore {
            id: id.clone(),
            config: self.config,
            transport,
            trust,
            validator: self.validator,
            observer: self.observer,
            state: ConnectState::Disconnected,
            attached: Vec::new(),
            session_trusted: Arc::new(StdMutex::new(HashSet::new())),
            home_path: None,
            working_directory: None,
            connected_at: None,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        };

        TransferSession {
            id,
            core: Arc::new(Mutex::new(core)),
            cancel: Arc::new(AtomicBool::new(false)),
            in_flight: AtomicUsize::new(0),
            keepalive: StdMutex::new(None),
        }
    }
}

// ─── Session state ───────────────────────────────────────────────────

pub(crate) struct SessionCore {
    id: String,
    config: SessionConfig,
    transport: Box<dyn Transport>,
    trust: Arc<TrustStore>,
    validator: Option<Arc<dyn CertificateValidator>>,
    observer: Arc<dyn SessionObserver>,
    state: ConnectState,
    /// Certificates captured on the first-use path, offered on every later attempt.
    attached: Vec<ServerCertificate>,
    /// Fingerprints accepted during this run.
    session_trusted: Arc<StdMutex<HashSet<String>>>,
    home_path: Option<String>,
    working_directory: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
}

impl SessionCore {
    /// Connect with at most one certificate retry.
    async fn establish(&mut self, reconnecting: bool) -> Result<(), ConnectError> {
        self.observer.connecting(&self.config.host, reconnecting);
        if let Err(msg) = self.config.validate() {
            self.state = ConnectState::Failed;
            return Err(ConnectError::NetworkUnreachable(msg));
        }

        let mut retries = 0u8;
        loop {
            self.state = if retries == 0 {
                ConnectState::Connecting
            } else {
                ConnectState::Retrying
            };
            let attached = !self.attached.is_empty();
            let gate = Arc::new(CertificateGate::new(
                self.trust.clone(),
                self.validator.clone(),
                attached,
                self.session_trusted.clone(),
            ));
            let params = ConnectParams::from_config(&self.config, self.attached.clone());
            debug!(
                "[{}] connect attempt {} to {}:{} (certificate attached: {})",
                self.id,
                retries + 1,
                params.host,
                params.port,
                attached
            );

            let err = match self.transport.connect(&params, gate.clone()).await {
                Ok(()) => break,
                Err(e) => e,
            };

            let pending = gate.take_pending();
            if err.kind.is_authentication()
                && !attached
                && !pending.is_empty()
                && retries < MAX_CERTIFICATE_RETRIES
            {
                self.state = ConnectState::AwaitingCertificateDecision;
                info!(
                    "[{}] first-use certificate captured, reconnecting with it attached",
                    self.id
                );
                self.attached.extend(pending);
                retries += 1;
                continue;
            }

            self.state = ConnectState::Failed;
            let mapped = ConnectError::from_transport(&err, attached);
            warn!("[{}] connect to {} failed: {}", self.id, self.config.host, mapped);
            return Err(mapped);
        }

        self.state = ConnectState::Connected;
        self.connected_at = Some(Utc::now());
        info!(
            "[{}] connected to {}:{}",
            self.id, self.config.host, self.config.port
        );
        self.enter_working_directory().await;
        Ok(())
    }

    async fn enter_working_directory(&mut self) {
        match self.transport.working_directory().await {
            Ok(home) => {
                self.home_path = Some(home.clone());
                self.working_directory = Some(home);
            }
            Err(e) => warn!("[{}] could not read home directory: {}", self.id, e),
        }

        let Some(dir) = self.config.working_directory_override().map(str::to_string) else {
            return;
        };
        match self.transport.change_directory(&dir).await {
            Ok(()) => {
                let now = self.transport.working_directory().await.unwrap_or(dir);
                self.working_directory = Some(now);
            }
            Err(e) => warn!("[{}] could not enter {}: {}", self.id, dir, e),
        }
    }

    async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.state = ConnectState::Disconnected;
        self.working_directory = None;
        self.connected_at = None;
        info!("[{}] disconnected from {}", self.id, self.config.host);
    }

    /// NOOP; a failure reconnects instead of surfacing. Sessions that are
    /// not connected (never connected, or the last connect failed) skip.
    pub(crate) async fn keep_alive(&mut self) -> Result<KeepAliveOutcome, ConnectError> {
        if self.state != ConnectState::Connected {
            return Ok(KeepAliveOutcome::Skipped);
        }
        match self.transport.execute_raw("NOOP").await {
            Ok(reply) if reply.success => return Ok(KeepAliveOutcome::Sent),
            Ok(reply) => warn!("[{}] keep-alive rejected: {}", self.id, reply.message),
            Err(e) => warn!("[{}] keep-alive failed: {}", self.id, e),
        }
        self.transport.disconnect().await;
        self.establish(true).await?;
        Ok(KeepAliveOutcome::Reconnected)
    }

    async fn transfer(
        &mut self,
        task: &TransferTask,
        pacing: Pacing,
        cancel: &AtomicBool,
    ) -> Result<TransferOutcome, TransferError> {
        let result = if self.transport.is_connected() {
            let opts = CopyOptions {
                chunk_size: self.config.chunk_size,
                limit_kbps: self.config.limit_for(task.direction),
                pacing,
                observer: self.observer.as_ref(),
                cancel,
            };
            match task.direction {
                TransferDirection::Upload => {
                    file_ops::upload(self.transport.as_mut(), task, &opts).await
                }
                TransferDirection::Download => {
                    file_ops::download(self.transport.as_mut(), task, &opts).await
                }
            }
        } else {
            Err(TransferError::NotConnected)
        };

        match &result {
            Ok(outcome) => match task.direction {
                TransferDirection::Upload => self.bytes_uploaded += outcome.bytes_transferred,
                TransferDirection::Download => self.bytes_downloaded += outcome.bytes_transferred,
            },
            Err(e) => warn!(
                "[{}] {:?} {} failed: {}",
                self.id, task.direction, task.remote_path, e
            ),
        }
        self.observer.transfer_finished(task, &result);
        result
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn fail(&self, operation: &str, path: &str, err: CommandError) -> CommandError {
        warn!("[{}] {} {} failed: {}", self.id, operation, path, err);
        self.observer.command_failed(operation, path, &err);
        err
    }

    fn check<T>(&self, operation: &str, path: &str, result: FtpResult<T>) -> Result<T, CommandError> {
        result.map_err(|e| self.fail(operation, path, e.into()))
    }

    /// Try each raw command in order until one succeeds.
    async fn first_accepted(
        &mut self,
        operation: &str,
        path: &str,
        commands: Vec<String>,
    ) -> Result<(), CommandError> {
        let mut last = CommandError::Unsupported(format!("no {} command available", operation));
        for cmd in commands {
            match self.transport.execute_raw(&cmd).await {
                Ok(reply) if reply.success => return Ok(()),
                Ok(reply) => {
                    warn!("[{}] {} rejected: {}", self.id, cmd, reply.message);
                    last = FtpError::from_reply(reply.code, &reply.message).into();
                }
                Err(e) => {
                    warn!("[{}] {} failed: {}", self.id, cmd, e);
                    let disconnected = e.kind == FtpErrorKind::Disconnected;
                    last = e.into();
                    if disconnected {
                        break;
                    }
                }
            }
        }
        Err(self.fail(operation, path, last))
    }

    async fn find_entry(&mut self, path: &str) -> FtpResult<Option<FtpEntry>> {
        let (parent, name) = split_parent(path);
        let entries = self.transport.listing(parent).await?;
        Ok(entries.into_iter().find(|e| e.name == name))
    }

    async fn modified_time(&mut self, path: &str) -> Result<DateTime<Utc>, CommandError> {
        if self.transport.features().mdtm {
            match self.transport.modified_time(path).await {
                Ok(t) => return Ok(t),
                Err(e) if e.kind == FtpErrorKind::Disconnected => {
                    return Err(self.fail("get_modified_time", path, e.into()))
                }
                Err(e) => warn!("[{}] MDTM {} failed: {}", self.id, path, e),
            }
        }
        let found = self.find_entry(path).await;
        match self.check("get_modified_time", path, found)? {
            Some(FtpEntry {
                modified: Some(t), ..
            }) => Ok(t),
            _ => Err(self.fail(
                "get_modified_time",
                path,
                CommandError::ServerRejected(format!("no modification time for {}", path)),
            )),
        }
    }

    async fn size_of(&mut self, path: &str) -> Result<u64, CommandError> {
        if self.transport.features().size {
            match self.transport.file_size(path).await {
                Ok(n) => return Ok(n),
                Err(e) if e.kind == FtpErrorKind::Disconnected => {
                    return Err(self.fail("size_of", path, e.into()))
                }
                Err(e) => warn!("[{}] SIZE {} failed: {}", self.id, path, e),
            }
        }
        let found = self.find_entry(path).await;
        match self.check("size_of", path, found)? {
            Some(entry) if entry.kind != FtpEntryKind::Directory => Ok(entry.size),
            _ => Err(self.fail(
                "size_of",
                path,
                CommandError::ServerRejected(format!("{}: not a file", path)),
            )),
        }
    }

    fn normalise(&self, listed: &str, entries: Vec<FtpEntry>) -> Vec<ListingEntry> {
        let wd = self.working_directory.as_deref().unwrap_or("");
        let root = self.config.remote_root.as_str();
        entries
            .into_iter()
            .map(|e| {
                let raw = if e.full_name.is_empty() {
                    paths::join(listed, &e.name)
                } else {
                    e.full_name
                };
                ListingEntry {
                    path: paths::normalize(&raw, wd, root),
                    name: e.name,
                    kind: e.kind.into(),
                    size: e.size,
                    modified: e.modified,
                    permissions: e.permissions,
                }
            })
            .collect()
    }

    fn info(&self) -> SessionInfo {
        let mut trusted: Vec<String> = self
            .session_trusted
            .lock()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        trusted.sort();
        SessionInfo {
            id: self.id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            security: self.config.security,
            state: self.state,
            home_path: self.home_path.clone(),
            working_directory: self.working_directory.clone(),
            trusted_this_run: trusted,
            connected_at: self.connected_at,
            bytes_uploaded: self.bytes_uploaded,
            bytes_downloaded: self.bytes_downloaded,
        }
    }
}

// ─── Public session ──────────────────────────────────────────────────

/// One logical connection to a remote host.
///
/// Sessions share nothing but the process-wide [`TrustStore`].
pub struct TransferSession {
    id: String,
    core: Arc<Mutex<SessionCore>>,
    cancel: Arc<AtomicBool>,
    /// Transfers running or waiting for the session lock.
    in_flight: AtomicUsize,
    keepalive: StdMutex<Option<JoinHandle<()>>>,
}

/// Counts a transfer as in flight; clears the cancel flag once the last
/// one is done, including when the caller drops the future.
struct InFlight<'a> {
    session: &'a TransferSession,
}

impl<'a> InFlight<'a> {
    fn enter(session: &'a TransferSession) -> Self {
        session.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { session }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.session.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.session.cancel.store(false, Ordering::SeqCst);
        }
    }
}

impl TransferSession {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// FTP session with default collaborators.
    pub fn ftp(config: SessionConfig, trust: Arc<TrustStore>) -> Self {
        SessionBuilder::new(config).trust_store(trust).build()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect, retrying once if a first-use certificate was captured,
    /// then arm the keep-alive timer.
    pub async fn connect(&self, reconnecting: bool) -> Result<(), ConnectError> {
        self.stop_keepalive();
        let interval = {
            let mut core = self.core.lock().await;
            core.establish(reconnecting).await?;
            core.config.keepalive_interval_sec
        };
        self.arm_keepalive(interval);
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.stop_keepalive();
        self.core.lock().await.disconnect().await;
    }

    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        self.stop_keepalive();
        self.core.lock().await.transport.disconnect().await;
        self.connect(true).await
    }

    /// Send a NOOP unless a transfer currently holds the session.
    pub async fn send_keep_alive(&self) -> Result<KeepAliveOutcome, ConnectError> {
        match self.core.try_lock() {
            Ok(mut core) => core.keep_alive().await,
            Err(_) => {
                debug!("[{}] keep-alive skipped: transfer in progress", self.id);
                Ok(KeepAliveOutcome::Skipped)
            }
        }
    }

    fn arm_keepalive(&self, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        let handle = spawn_keepalive(Arc::downgrade(&self.core), interval_secs);
        if let Ok(mut slot) = self.keepalive.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    fn stop_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
    }

    // ── Transfers ────────────────────────────────────────────────────

    /// Run a transfer in the direction the task names.
    pub async fn transfer(&self, task: &TransferTask) -> Result<TransferOutcome, TransferError> {
        self.transfer_with(task, Pacing::Cooperative).await
    }

    pub async fn upload(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
    ) -> Result<TransferOutcome, TransferError> {
        self.transfer(&TransferTask::upload(local_path.as_ref(), remote_path))
            .await
    }

    pub async fn download(
        &self,
        remote_path: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<TransferOutcome, TransferError> {
        self.transfer(&TransferTask::download(remote_path, local_path.as_ref()))
            .await
    }

    pub(crate) async fn transfer_with(
        &self,
        task: &TransferTask,
        pacing: Pacing,
    ) -> Result<TransferOutcome, TransferError> {
        let _in_flight = InFlight::enter(self);
        let mut core = self.core.lock().await;
        core.transfer(task, pacing, &self.cancel).await
    }

    /// Abort the running transfer after its current chunk.
    ///
    /// A transfer still waiting for the session is aborted before its first
    /// chunk. With nothing in flight this does nothing, so a stale cancel
    /// never reaches a later transfer.
    pub fn cancel_transfer(&self) {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            self.cancel.store(true, Ordering::SeqCst);
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), CommandError> {
        let mut core = self.core.lock().await;
        let result = core.transport.rename(from, to).await;
        core.check("rename", from, result)
    }

    /// Delete a file, or a folder with everything below it.
    pub async fn remove(&self, path: &str, kind: ItemKind) -> Result<(), CommandError> {
        let mut core = self.core.lock().await;
        let result = match kind {
            ItemKind::Folder => core.transport.delete_directory(path, true).await,
            ItemKind::File | ItemKind::Other => core.transport.delete_file(path).await,
        };
        core.check("remove", path, result)
    }

    /// Create a folder and any missing parents.
    pub async fn make_folder(&self, path: &str) -> Result<(), CommandError> {
        let mut core = self.core.lock().await;
        let result = core.transport.create_directory(path, true).await;
        core.check("make_folder", path, result)
    }

    /// `SITE CHMOD`, falling back to `CHMOD`. `mode` is the octal permission value.
    pub async fn set_file_permissions(&self, path: &str, mode: u32) -> Result<(), CommandError> {
        let commands = vec![
            format!("SITE CHMOD {:o} {}", mode, path),
            format!("CHMOD {:o} {}", mode, path),
        ];
        self.core
            .lock()
            .await
            .first_accepted("set_file_permissions", path, commands)
            .await
    }

    pub async fn get_modified_time(&self, path: &str) -> Result<DateTime<Utc>, CommandError> {
        self.core.lock().await.modified_time(path).await
    }

    /// `MFMT` or `MFF` when advertised, then `SITE UTIME`.
    pub async fn set_modified_time(
        &self,
        path: &str,
        time: DateTime<Utc>,
    ) -> Result<(), CommandError> {
        let mut core = self.core.lock().await;
        let stamp = time.format("%Y%m%d%H%M%S").to_string();
        let features = core.transport.features();

        let mut commands = Vec::new();
        if features.mfmt {
            commands.push(format!("MFMT {} {}", stamp, path));
        }
        if features.mff {
            commands.push(format!("MFF modify={}; {}", stamp, path));
        }
        commands.push(format!("SITE UTIME {} {}", stamp, path));
        core.first_accepted("set_modified_time", path, commands).await
    }

    pub async fn size_of(&self, path: &str) -> Result<u64, CommandError> {
        self.core.lock().await.size_of(path).await
    }

    /// Whether a file or directory exists at `path`.
    pub async fn exists(&self, path: &str) -> Result<bool, CommandError> {
        let mut core = self.core.lock().await;
        let file = core.transport.file_exists(path).await;
        if core.check("exists", path, file)? {
            return Ok(true);
        }
        let dir = core.transport.directory_exists(path).await;
        core.check("exists", path, dir)
    }

    /// Listing of `path` with every entry's path in canonical absolute form.
    pub async fn get_file_listing(&self, path: &str) -> Result<Vec<ListingEntry>, CommandError> {
        let mut core = self.core.lock().await;
        let listed = core.transport.listing(path).await;
        let entries = core.check("get_file_listing", path, listed)?;
        Ok(core.normalise(path, entries))
    }

    pub async fn change_directory(&self, path: &str) -> Result<(), CommandError> {
        let mut core = self.core.lock().await;
        let result = core.transport.change_directory(path).await;
        core.check("change_directory", path, result)?;
        let now = core
            .transport
            .working_directory()
            .await
            .unwrap_or_else(|_| path.to_string());
        core.working_directory = Some(now);
        Ok(())
    }

    // ── State ────────────────────────────────────────────────────────

    /// Directory the server put us in at login.
    pub async fn home_path(&self) -> Option<String> {
        self.core.lock().await.home_path.clone()
    }

    pub async fn working_directory(&self) -> Option<String> {
        self.core.lock().await.working_directory.clone()
    }

    pub async fn state(&self) -> ConnectState {
        self.core.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.core.lock().await.transport.is_connected()
    }

    pub async fn info(&self) -> SessionInfo {
        self.core.lock().await.info()
    }

    /// Certificates captured on the first-use path during this run.
    pub async fn attached_certificates(&self) -> Vec<ServerCertificate> {
        self.core.lock().await.attached.clone()
    }

    /// Persist a fingerprint the user chose to trust.
    pub async fn trust_certificate(&self, certificate: &ServerCertificate) -> io::Result<bool> {
        let core = self.core.lock().await;
        if let Ok(mut set) = core.session_trusted.lock() {
            set.insert(normalize_fingerprint(&certificate.fingerprint));
        }
        core.trust.accept(&certificate.fingerprint)
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}
