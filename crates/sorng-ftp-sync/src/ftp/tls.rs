//! TLS helpers for Explicit and Implicit FTPS (RFC 4217).
//!
//! - Builds a rustls `TlsConnector` whose verifier hands every server
//!   certificate to a [`HandshakeGate`] together with the verdict of the
//!   regular WebPKI chain validation.
//! - Provides `upgrade_to_tls` for wrapping an existing plain codec and
//!   `wrap_data_stream` for protected data channels.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{FtpCodec, ReadHalf, WriteHalf};
use crate::ftp::trust::HandshakeGate;
use crate::ftp::types::ServerCertificate;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

// ─── Certificate facts ───────────────────────────────────────────────

/// Describe a DER certificate. Unparseable certificates keep their fingerprint.
pub fn describe_certificate(der: &[u8]) -> ServerCertificate {
    let mut hasher = Sha256::new();
    hasher.update(der);
    let mut cert = ServerCertificate::from_fingerprint(hex::encode(hasher.finalize()));

    if let Ok((_rem, parsed)) = x509_parser::parse_x509_certificate(der) {
        cert.subject = Some(parsed.subject().to_string());
        cert.issuer = Some(parsed.issuer().to_string());
        cert.valid_from = Some(parsed.validity().not_before.to_rfc2822().unwrap_or_default());
        cert.valid_to = Some(parsed.validity().not_after.to_rfc2822().unwrap_or_default());
        cert.serial = Some(parsed.raw_serial_as_string());
        cert.signature_algorithm = Some(parsed.signature_algorithm.algorithm.to_id_string());
    }
    cert
}

// ─── Verifier ────────────────────────────────────────────────────────

/// Runs the standard chain validation, then lets the gate decide.
#[derive(Debug)]
struct GatedVerifier {
    /// `None` when no trust anchors could be loaded.
    webpki: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    gate: Arc<dyn HandshakeGate>,
}

impl ServerCertVerifier for GatedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let policy_violation = match &self.webpki {
            Some(v) => match v.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ) {
                Ok(_) => false,
                Err(e) => {
                    log::debug!("Certificate failed chain validation: {}", e);
                    true
                }
            },
            None => true,
        };

        let certificate = describe_certificate(end_entity.as_ref());
        if self.gate.review(&certificate, policy_violation) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "certificate {} not trusted",
                certificate.fingerprint
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ─── Connector ───────────────────────────────────────────────────────

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        log::warn!("Could not load a platform certificate: {}", e);
    }
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    log::debug!("Loaded {} platform trust anchors ({} ignored)", added, ignored);
    roots
}

/// Build a connector for one connection; reuse it for that connection's
/// data channels so TLS sessions can be resumed.
pub fn build_tls_connector(gate: Arc<dyn HandshakeGate>) -> FtpResult<TlsConnector> {
    build_tls_connector_with_roots(gate, native_roots())
}

pub fn build_tls_connector_with_roots(
    gate: Arc<dyn HandshakeGate>,
    roots: RootCertStore,
) -> FtpResult<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let webpki = if roots.is_empty() {
        None
    } else {
        WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| log::warn!("Chain validation unavailable: {}", e))
            .ok()
    };

    let verifier = GatedVerifier {
        webpki,
        provider: provider.clone(),
        gate,
    };

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| FtpError::tls_failed(format!("TLS configuration: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn server_name(host: &str) -> FtpResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| FtpError::tls_failed(format!("Invalid server name '{}': {}", host, e)))
}

/// Run a client handshake over `tcp`.
pub async fn handshake(
    connector: &TlsConnector,
    host: &str,
    tcp: TcpStream,
    what: &str,
) -> FtpResult<TlsStream<TcpStream>> {
    connector
        .connect(server_name(host)?, tcp)
        .await
        .map_err(|e| FtpError::tls_failed(format!("{} TLS handshake: {}", what, e)))
}

/// Upgrade an existing **plain** control connection to TLS.
///
/// Called after a successful `AUTH TLS` + 234 reply.
pub async fn upgrade_to_tls(
    codec: FtpCodec,
    host: &str,
    connector: &TlsConnector,
) -> FtpResult<FtpCodec> {
    let tcp = reunite_plain(codec)?;
    let tls = handshake(connector, host, tcp, "Explicit").await?;
    Ok(FtpCodec::from_tls(tls))
}

/// Reunite the read + write halves back into a `TcpStream`.
/// Only works when both halves are `Plain`.
fn reunite_plain(codec: FtpCodec) -> FtpResult<TcpStream> {
    let (rd, wr) = match (codec.reader, codec.writer) {
        (ReadHalf::Plain(br), WriteHalf::Plain(w)) => (br.into_inner(), w),
        _ => {
            return Err(FtpError::protocol_error(
                "Cannot upgrade: connection is already TLS",
            ))
        }
    };
    rd.reunite(wr)
        .map_err(|e| FtpError::protocol_error(format!("Reunite failed: {}", e)))
}

/// Create a TLS-wrapped data channel for FTPS.
pub async fn wrap_data_stream(
    tcp: TcpStream,
    host: &str,
    connector: &TlsConnector,
) -> FtpResult<TlsStream<TcpStream>> {
    handshake(connector, host, tcp, "Data channel").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct AcceptAll;

    impl HandshakeGate for AcceptAll {
        fn review(&self, _certificate: &ServerCertificate, _policy_violation: bool) -> bool {
            true
        }
    }

    #[test]
    fn garbage_der_still_has_a_fingerprint() {
        let cert = describe_certificate(b"not a certificate");
        assert_eq!(cert.fingerprint.len(), 64);
        assert!(cert.fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(cert.subject.is_none());
        assert!(cert.serial.is_none());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let cert = describe_certificate(b"");
        assert_eq!(
            cert.fingerprint,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn connector_builds_without_trust_anchors() {
        assert!(build_tls_connector_with_roots(Arc::new(AcceptAll), RootCertStore::empty()).is_ok());
    }

    #[test]
    fn ip_addresses_are_valid_server_names() {
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("ftp.example.com").is_ok());
        assert!(server_name("not a host").is_err());
    }
}
