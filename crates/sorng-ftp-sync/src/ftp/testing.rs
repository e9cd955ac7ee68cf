//! In-memory `Transport` for tests.
//!
//! `MockServer` is the shared remote state; each `MockTransport` is one
//! client connection to it.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::parser;
use crate::ftp::paths;
use crate::ftp::transport::{RemoteReader, RemoteWriter, Transport};
use crate::ftp::trust::HandshakeGate;
use crate::ftp::types::*;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

#[derive(Debug)]
pub struct ServerState {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub mtimes: HashMap<String, DateTime<Utc>>,
    pub home: String,
    pub features: ServerFeatures,
    /// Certificate shown on secured connects, with its policy-violation flag.
    pub certificate: Option<(ServerCertificate, bool)>,
    pub connect_attempts: usize,
    /// Number of client certificates offered on each attempt.
    pub offered_certificates: Vec<usize>,
    pub refuse_connections: bool,
    /// Next N NOOPs answer 421.
    pub failing_noops: usize,
    /// Reply overrides by command prefix: (success, code).
    pub replies: Vec<(String, bool, u16)>,
    pub commands: Vec<String>,
    /// Answer listings of "." / "" with `./name` paths.
    pub relative_listings: bool,
    /// Raw LIST/MLSD bodies by directory, run through the listing parser.
    pub wire_listings: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MockServer {
    pub state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            state: Arc::new(Mutex::new(ServerState {
                files: BTreeMap::new(),
                dirs,
                mtimes: HashMap::new(),
                home: "/".into(),
                features: ServerFeatures {
                    size: true,
                    mdtm: true,
                    ..ServerFeatures::default()
                },
                certificate: None,
                connect_attempts: 0,
                offered_certificates: Vec::new(),
                refuse_connections: false,
                failing_noops: 0,
                replies: Vec::new(),
                commands: Vec::new(),
                relative_listings: true,
                wire_listings: HashMap::new(),
            })),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.with(|s| {
            s.files.insert(path.to_string(), data.to_vec());
        });
    }

    pub fn put_dir(&self, path: &str) {
        self.with(|s| {
            s.dirs.insert(path.to_string());
        });
    }

    /// Answer listings of `dir` with a raw server payload.
    pub fn wire_listing(&self, dir: &str, body: &str) {
        self.with(|s| {
            s.wire_listings.insert(dir.to_string(), body.to_string());
        });
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.with(|s| s.files.get(path).cloned())
    }

    pub fn reply(&self, prefix: &str, success: bool, code: u16) {
        self.with(|s| s.replies.push((prefix.to_string(), success, code)));
    }

    pub fn commands(&self) -> Vec<String> {
        self.with(|s| s.commands.clone())
    }

    pub fn connect_attempts(&self) -> usize {
        self.with(|s| s.connect_attempts)
    }
}

pub struct MockTransport {
    server: MockServer,
    connected: bool,
    cwd: String,
}

impl MockTransport {
    pub fn new(server: &MockServer) -> Self {
        Self {
            server: server.clone(),
            connected: false,
            cwd: "/".into(),
        }
    }

    /// Already connected, for tests that skip the handshake.
    pub fn connected(server: &MockServer) -> Self {
        let mut t = Self::new(server);
        t.connected = true;
        t.cwd = server.with(|s| s.home.clone());
        t
    }

    fn check(&self) -> FtpResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(FtpError::disconnected("Not connected"))
        }
    }

    fn resolve(&self, path: &str) -> String {
        match path.trim() {
            "" | "." => self.cwd.clone(),
            "/" => "/".to_string(),
            p if p.starts_with('/') => p.trim_end_matches('/').to_string(),
            p => paths::join(&self.cwd, p.trim_start_matches("./")),
        }
    }
}

fn not_found(path: &str) -> FtpError {
    FtpError::from_reply(550, &format!("550 {}: No such file or directory", path))
}

struct MockWriter {
    path: String,
    buf: Vec<u8>,
    server: MockServer,
}

impl MockWriter {
    fn commit(&mut self) {
        let data = self.buf.clone();
        self.server.with(|s| {
            s.files.insert(self.path.clone(), data);
        });
    }
}

impl AsyncWrite for MockWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().commit();
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.commit();
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        params: &ConnectParams,
        gate: Arc<dyn HandshakeGate>,
    ) -> FtpResult<()> {
        let (certificate, refuse, home) = self.server.with(|s| {
            s.connect_attempts += 1;
            s.offered_certificates.push(params.client_certificates.len());
            (s.certificate.clone(), s.refuse_connections, s.home.clone())
        });
        if refuse {
            return Err(FtpError::connection_failed("connection refused"));
        }
        if params.security.is_secure() {
            if let Some((cert, violation)) = certificate {
                if !gate.review(&cert, violation) {
                    return Err(FtpError::tls_failed("certificate rejected by client"));
                }
            }
        }
        self.connected = true;
        self.cwd = home;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn features(&self) -> ServerFeatures {
        self.server.with(|s| s.features.clone())
    }

    async fn working_directory(&mut self) -> FtpResult<String> {
        self.check()?;
        Ok(self.cwd.clone())
    }

    async fn change_directory(&mut self, path: &str) -> FtpResult<()> {
        self.check()?;
        let target = self.resolve(path);
        if self.server.with(|s| s.dirs.contains(&target)) {
            self.cwd = target;
            Ok(())
        } else {
            Err(not_found(path))
        }
    }

    async fn open_read(&mut self, path: &str) -> FtpResult<RemoteReader> {
        self.check()?;
        let target = self.resolve(path);
        let data = self
            .server
            .with(|s| s.files.get(&target).cloned())
            .ok_or_else(|| not_found(path))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn open_write(&mut self, path: &str) -> FtpResult<RemoteWriter> {
        self.check()?;
        Ok(Box::new(MockWriter {
            path: self.resolve(path),
            buf: Vec::new(),
            server: self.server.clone(),
        }))
    }

    async fn finish_transfer(&mut self) -> FtpResult<()> {
        self.check()
    }

    async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.check()?;
        let (from, to) = (self.resolve(from), self.resolve(to));
        self.server.with(|s| match s.files.remove(&from) {
            Some(data) => {
                s.files.insert(to, data);
                Ok(())
            }
            None if s.dirs.remove(&from) => {
                s.dirs.insert(to);
                Ok(())
            }
            None => Err(not_found(&from)),
        })
    }

    async fn create_directory(&mut self, path: &str, recursive: bool) -> FtpResult<()> {
        self.check()?;
        let target = self.resolve(path);
        self.server.with(|s| {
            let mut current = String::new();
            let parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();
            for (i, part) in parts.iter().enumerate() {
                current.push('/');
                current.push_str(part);
                let last = i + 1 == parts.len();
                if !s.dirs.contains(&current) {
                    if !recursive && !last {
                        return Err(not_found(&current));
                    }
                    s.dirs.insert(current.clone());
                }
            }
            Ok(())
        })
    }

    async fn delete_file(&mut self, path: &str) -> FtpResult<()> {
        self.check()?;
        let target = self.resolve(path);
        self.server.with(|s| {
            s.files
                .remove(&target)
                .map(|_| ())
                .ok_or_else(|| not_found(&target))
        })
    }

    async fn delete_directory(&mut self, path: &str, recursive: bool) -> FtpResult<()> {
        self.check()?;
        let target = self.resolve(path);
        let prefix = format!("{}/", target);
        self.server.with(|s| {
            if !s.dirs.contains(&target) {
                return Err(not_found(&target));
            }
            let has_children = s.files.keys().any(|k| k.starts_with(&prefix))
                || s.dirs.iter().any(|d| d.starts_with(&prefix));
            if has_children && !recursive {
                return Err(FtpError::from_reply(550, "550 Directory not empty"));
            }
            s.files.retain(|k, _| !k.starts_with(&prefix));
            s.dirs.retain(|d| !d.starts_with(&prefix) && *d != target);
            Ok(())
        })
    }

    async fn file_exists(&mut self, path: &str) -> FtpResult<bool> {
        self.check()?;
        let target = self.resolve(path);
        Ok(self.server.with(|s| s.files.contains_key(&target)))
    }

    async fn directory_exists(&mut self, path: &str) -> FtpResult<bool> {
        self.check()?;
        let target = self.resolve(path);
        Ok(self.server.with(|s| s.dirs.contains(&target)))
    }

    async fn file_size(&mut self, path: &str) -> FtpResult<u64> {
        self.check()?;
        let target = self.resolve(path);
        self.server.with(|s| {
            if !s.features.size {
                return Err(FtpError::from_reply(502, "502 SIZE not implemented"));
            }
            s.files
                .get(&target)
                .map(|d| d.len() as u64)
                .ok_or_else(|| not_found(&target))
        })
    }

    async fn modified_time(&mut self, path: &str) -> FtpResult<DateTime<Utc>> {
        self.check()?;
        let target = self.resolve(path);
        self.server.with(|s| {
            if !s.features.mdtm {
                return Err(FtpError::from_reply(502, "502 MDTM not implemented"));
            }
            s.mtimes.get(&target).copied().ok_or_else(|| not_found(&target))
        })
    }

    async fn execute_raw(&mut self, command: &str) -> FtpResult<CommandReply> {
        self.check()?;
        let reply = self.server.with(|s| {
            s.commands.push(command.to_string());
            if command == "NOOP" && s.failing_noops > 0 {
                s.failing_noops -= 1;
                return CommandReply {
                    success: false,
                    code: 421,
                    message: "421 Timeout".into(),
                };
            }
            let over = s
                .replies
                .iter()
                .filter(|(prefix, _, _)| command.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _, _)| prefix.len())
                .cloned();
            match over {
                Some((_, success, code)) => CommandReply {
                    success,
                    code,
                    message: format!("{} reply to {}", code, command),
                },
                None => CommandReply {
                    success: true,
                    code: 200,
                    message: "200 OK".into(),
                },
            }
        });
        Ok(reply)
    }

    async fn listing(&mut self, path: &str) -> FtpResult<Vec<FtpEntry>> {
        self.check()?;
        let dir = self.resolve(path);
        let relative = matches!(path.trim(), "" | ".");
        self.server.with(|s| {
            if let Some(body) = s.wire_listings.get(&dir) {
                return Ok(parser::parse_listing_at(body, path));
            }
            if !s.dirs.contains(&dir) {
                return Err(not_found(&dir));
            }
            let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
            let child = |full: &str| -> Option<String> {
                let rest = full.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            };
            let full_name = |name: &str| {
                if relative && s.relative_listings {
                    format!("./{}", name)
                } else {
                    paths::join(&dir, name)
                }
            };

            let mut entries = Vec::new();
            for d in &s.dirs {
                if let Some(name) = child(d) {
                    entries.push(entry(&name, full_name(&name), FtpEntryKind::Directory, 0, None));
                }
            }
            for (f, data) in &s.files {
                if let Some(name) = child(f) {
                    entries.push(entry(
                        &name,
                        full_name(&name),
                        FtpEntryKind::File,
                        data.len() as u64,
                        s.mtimes.get(f).copied(),
                    ));
                }
            }
            Ok(entries)
        })
    }
}

fn entry(
    name: &str,
    full_name: String,
    kind: FtpEntryKind,
    size: u64,
    modified: Option<DateTime<Utc>>,
) -> FtpEntry {
    FtpEntry {
        name: name.to_string(),
        full_name,
        kind,
        size,
        modified,
        permissions: Some("-rw-r--r--".into()),
        owner: None,
        group: None,
        link_target: None,
        raw: None,
        facts: HashMap::new(),
    }
}
