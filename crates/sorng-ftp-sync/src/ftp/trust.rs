//! Certificate trust: persisted fingerprints, interactive validation,
//! and the per-attempt handshake gate.
//!
//! The persisted list is shared by every session in the process; it is
//! only ever appended to through [`TrustStore::accept`]. Pending
//! (first-use) certificates and fingerprints accepted during a run
//! belong to a single session.

use crate::ftp::types::{ServerCertificate, TrustDecision, ValidatorVerdict};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

// ─── Validator ───────────────────────────────────────────────────────

/// Interactive trust prompt supplied by the host application.
///
/// Called synchronously from inside the TLS handshake.
pub trait CertificateValidator: Send + Sync {
    fn evaluate(&self, certificate: &ServerCertificate) -> ValidatorVerdict;
}

impl<F> CertificateValidator for F
where
    F: Fn(&ServerCertificate) -> ValidatorVerdict + Send + Sync,
{
    fn evaluate(&self, certificate: &ServerCertificate) -> ValidatorVerdict {
        self(certificate)
    }
}

// ─── Persistence ─────────────────────────────────────────────────────

/// Backing store for trusted fingerprints. The format is the store's business.
pub trait FingerprintStore: Send + Sync {
    fn load(&self) -> io::Result<Vec<String>>;
    fn append(&self, fingerprint: &str) -> io::Result<()>;
}

/// Non-persistent store.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    entries: Mutex<Vec<String>>,
}

impl MemoryFingerprintStore {
    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().map(Into::into).collect()),
        }
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn load(&self) -> io::Result<Vec<String>> {
        Ok(self.entries.lock().map(|e| e.clone()).unwrap_or_default())
    }

    fn append(&self, fingerprint: &str) -> io::Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(fingerprint.to_string());
        }
        Ok(())
    }
}

/// Trusted fingerprints as a JSON array of strings.
#[derive(Debug, Clone)]
pub struct JsonFingerprintFile {
    path: PathBuf,
}

impl JsonFingerprintFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/sortofremoteng/ftp-trusted-certificates.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| {
            d.join("sortofremoteng")
                .join("ftp-trusted-certificates.json")
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, entries: &[String]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }
}

impl FingerprintStore for JsonFingerprintFile {
    fn load(&self) -> io::Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn append(&self, fingerprint: &str) -> io::Result<()> {
        let mut entries = self.load()?;
        if !entries.iter().any(|e| e == fingerprint) {
            entries.push(fingerprint.to_string());
        }
        self.write_all(&entries)
    }
}

// ─── Trust store ─────────────────────────────────────────────────────

/// Process-wide list of trusted certificate fingerprints.
pub struct TrustStore {
    trusted: RwLock<HashSet<String>>,
    store: Box<dyn FingerprintStore>,
}

impl fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustStore")
            .field("trusted", &self.fingerprints().len())
            .finish()
    }
}

impl TrustStore {
    /// Read the persisted fingerprints once, at startup.
    pub fn load(store: Box<dyn FingerprintStore>) -> io::Result<Self> {
        let trusted: HashSet<String> = store
            .load()?
            .into_iter()
            .map(|fp| normalize_fingerprint(&fp))
            .collect();
        debug!("Loaded {} trusted certificate fingerprints", trusted.len());
        Ok(Self {
            trusted: RwLock::new(trusted),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            trusted: RwLock::new(HashSet::new()),
            store: Box::new(MemoryFingerprintStore::default()),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_trusted(&self, fingerprint: &str) -> bool {
        let fp = normalize_fingerprint(fingerprint);
        self.trusted
            .read()
            .map(|set| set.contains(&fp))
            .unwrap_or(false)
    }

    pub fn fingerprints(&self) -> Vec<String> {
        let mut list: Vec<String> = self
            .trusted
            .read()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        list.sort();
        list
    }

    /// Remember a fingerprint the user accepted. Returns `false` if it was
    /// already trusted. Appends are serialised under the write lock.
    pub fn accept(&self, fingerprint: &str) -> io::Result<bool> {
        let fp = normalize_fingerprint(fingerprint);
        let mut set = self
            .trusted
            .write()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "trust store lock poisoned"))?;
        if set.contains(&fp) {
            return Ok(false);
        }
        self.store.append(&fp)?;
        set.insert(fp.clone());
        info!("Certificate {} added to the trusted list", fp);
        Ok(true)
    }

    /// Decide what to do with a presented certificate.
    ///
    /// Never writes to the persisted list.
    pub fn evaluate(
        &self,
        certificate: &ServerCertificate,
        has_client_certificate: bool,
        policy_violation: bool,
        validator: Option<&dyn CertificateValidator>,
    ) -> TrustDecision {
        if !has_client_certificate && policy_violation {
            return TrustDecision::PendingFirstUse;
        }
        match validator {
            None => TrustDecision::AutoTrusted,
            Some(_) if self.is_trusted(&certificate.fingerprint) => TrustDecision::AutoTrusted,
            Some(v) => TrustDecision::UserPrompted(v.evaluate(certificate)),
        }
    }
}

/// Lowercase hex without separators, so `AB:CD` and `abcd` compare equal.
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ─── Handshake gate ──────────────────────────────────────────────────

/// Consulted by the transport for every certificate it is shown.
pub trait HandshakeGate: Send + Sync + fmt::Debug {
    /// `true` accepts the certificate and lets the handshake continue.
    fn review(&self, certificate: &ServerCertificate, policy_violation: bool) -> bool;
}

/// Gate used by a session for one connection attempt.
pub struct CertificateGate {
    trust: Arc<TrustStore>,
    validator: Option<Arc<dyn CertificateValidator>>,
    client_certificate_attached: bool,
    pending: Mutex<Vec<ServerCertificate>>,
    /// Fingerprints accepted earlier in the owning session.
    session_trusted: Arc<Mutex<HashSet<String>>>,
}

impl fmt::Debug for CertificateGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateGate")
            .field("client_certificate_attached", &self.client_certificate_attached)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl CertificateGate {
    pub fn new(
        trust: Arc<TrustStore>,
        validator: Option<Arc<dyn CertificateValidator>>,
        client_certificate_attached: bool,
        session_trusted: Arc<Mutex<HashSet<String>>>,
    ) -> Self {
        Self {
            trust,
            validator,
            client_certificate_attached,
            pending: Mutex::new(Vec::new()),
            session_trusted,
        }
    }

    /// Certificates captured on the first-use path.
    pub fn take_pending(&self) -> Vec<ServerCertificate> {
        self.pending
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default()
    }

    pub fn decide(&self, certificate: &ServerCertificate, policy_violation: bool) -> TrustDecision {
        let fp = normalize_fingerprint(&certificate.fingerprint);
        let already = self
            .session_trusted
            .lock()
            .map(|s| s.contains(&fp))
            .unwrap_or(false);
        if already {
            return TrustDecision::AutoTrusted;
        }

        let decision = self.trust.evaluate(
            certificate,
            self.client_certificate_attached,
            policy_violation,
            self.validator.as_deref(),
        );

        match decision {
            TrustDecision::PendingFirstUse => {
                debug!("Capturing first-use certificate {}", fp);
                if let Ok(mut pending) = self.pending.lock() {
                    pending.push(certificate.clone());
                }
            }
            TrustDecision::UserPrompted(ValidatorVerdict::Rejected) => {
                warn!("Certificate {} rejected by validator", fp);
            }
            _ => {
                if let Ok(mut s) = self.session_trusted.lock() {
                    s.insert(fp);
                }
            }
        }
        decision
    }
}

impl HandshakeGate for CertificateGate {
    fn review(&self, certificate: &ServerCertificate, policy_violation: bool) -> bool {
        self.decide(certificate, policy_violation).accepts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cert(fp: &str) -> ServerCertificate {
        ServerCertificate::from_fingerprint(fp)
    }

    struct CountingValidator {
        calls: AtomicUsize,
        verdict: ValidatorVerdict,
    }

    impl CertificateValidator for CountingValidator {
        fn evaluate(&self, _certificate: &ServerCertificate) -> ValidatorVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict
        }
    }

    fn counting(verdict: ValidatorVerdict) -> Arc<CountingValidator> {
        Arc::new(CountingValidator {
            calls: AtomicUsize::new(0),
            verdict,
        })
    }

    #[test]
    fn first_use_violation_without_client_certificate_is_pending() {
        let store = TrustStore::in_memory();
        let d = store.evaluate(&cert("aa"), false, true, None);
        assert_eq!(d, TrustDecision::PendingFirstUse);
    }

    #[test]
    fn no_validator_accepts() {
        let store = TrustStore::in_memory();
        assert_eq!(
            store.evaluate(&cert("aa"), true, true, None),
            TrustDecision::AutoTrusted
        );
        assert_eq!(
            store.evaluate(&cert("aa"), false, false, None),
            TrustDecision::AutoTrusted
        );
    }

    #[test]
    fn trusted_fingerprint_skips_validator() {
        let store = TrustStore::load(Box::new(MemoryFingerprintStore::with_entries(["AB:CD:EF"])))
            .unwrap();
        let validator = counting(ValidatorVerdict::Rejected);
        let d = store.evaluate(&cert("abcdef"), true, true, Some(validator.as_ref()));
        assert_eq!(d, TrustDecision::AutoTrusted);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_fingerprint_is_prompted() {
        let store = TrustStore::in_memory();
        let validator = counting(ValidatorVerdict::Trusted);
        let d = store.evaluate(&cert("01"), true, true, Some(validator.as_ref()));
        assert_eq!(d, TrustDecision::UserPrompted(ValidatorVerdict::Trusted));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn evaluate_does_not_persist() {
        let store = TrustStore::in_memory();
        let validator = counting(ValidatorVerdict::Trusted);
        store.evaluate(&cert("01"), true, false, Some(validator.as_ref()));
        assert!(!store.is_trusted("01"));
    }

    #[test]
    fn accept_is_idempotent() {
        let store = TrustStore::in_memory();
        assert!(store.accept("AA:BB").unwrap());
        assert!(!store.accept("aabb").unwrap());
        assert_eq!(store.fingerprints(), vec!["aabb".to_string()]);
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trusted.json");

        let store = TrustStore::load(Box::new(JsonFingerprintFile::new(&path))).unwrap();
        assert!(store.fingerprints().is_empty());
        store.accept("deadbeef").unwrap();
        store.accept("cafebabe").unwrap();

        let reloaded = TrustStore::load(Box::new(JsonFingerprintFile::new(&path))).unwrap();
        assert!(reloaded.is_trusted("deadbeef"));
        assert!(reloaded.is_trusted("CA:FE:BA:BE"));
    }

    #[test]
    fn corrupt_json_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(TrustStore::load(Box::new(JsonFingerprintFile::new(&path))).is_err());
    }

    #[test]
    fn concurrent_accepts_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        let store = Arc::new(TrustStore::load(Box::new(JsonFingerprintFile::new(&path))).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.accept(&format!("{:02x}", i)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let on_disk = JsonFingerprintFile::new(&path).load().unwrap();
        assert_eq!(on_disk.len(), 8);
    }

    #[test]
    fn gate_captures_pending_and_rejects() {
        let gate = CertificateGate::new(
            TrustStore::in_memory().shared(),
            None,
            false,
            Arc::new(Mutex::new(HashSet::new())),
        );
        assert!(!gate.review(&cert("aa"), true));
        let pending = gate.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fingerprint, "aa");
        assert!(gate.take_pending().is_empty());
    }

    #[test]
    fn gate_remembers_session_acceptance() {
        let validator = counting(ValidatorVerdict::Trusted);
        let session_trusted = Arc::new(Mutex::new(HashSet::new()));
        let gate = CertificateGate::new(
            TrustStore::in_memory().shared(),
            Some(validator.clone()),
            true,
            session_trusted.clone(),
        );
        assert!(gate.review(&cert("aa"), true));
        assert!(gate.review(&cert("aa"), true));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
        assert!(session_trusted.lock().unwrap().contains("aa"));
    }

    #[test]
    fn closure_validator() {
        let v = |c: &ServerCertificate| {
            if c.fingerprint == "ok" {
                ValidatorVerdict::Trusted
            } else {
                ValidatorVerdict::Rejected
            }
        };
        assert_eq!(v.evaluate(&cert("ok")), ValidatorVerdict::Trusted);
        assert_eq!(v.evaluate(&cert("bad")), ValidatorVerdict::Rejected);
    }
}
