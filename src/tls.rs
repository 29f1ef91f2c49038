use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::SystemTime;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, KeyUsagePurpose};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::protocol::{ALPN, CERT_VALIDITY};

/// Ephemeral server identity plus the QUIC config built from it.
pub struct ServerIdentity {
    pub config: quinn::ServerConfig,
    /// SHA-256 of the DER certificate, lowercase hex
    pub fingerprint: String,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn subject_alt_names() -> Vec<String> {
    let mut names = vec!["localhost".to_string()];
    if let Ok(h) = hostname::get() {
        let h = h.to_string_lossy().into_owned();
        if !h.is_empty() && h != "localhost" {
            names.push(h);
        }
    }
    names
}

/// Certificate parameters for a self-signed identity valid from `now` for 24 hours.
pub fn certificate_params(now: SystemTime) -> CertificateParams {
    let mut params = CertificateParams::new(subject_alt_names());
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "quicdrop ephemeral");
    params.distinguished_name = dn;
    params.not_before = now.into();
    params.not_after = (now + CERT_VALIDITY).into();
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params
}

/// Generate a fresh key pair and self-signed certificate and wrap them in a
/// QUIC server config advertising [`ALPN`]. Any failure here is fatal for
/// the caller; there is no fallback identity.
pub fn generate_server_config() -> Result<ServerIdentity> {
    let cert = Certificate::from_params(certificate_params(SystemTime::now()))
        .context("generate self-signed cert")?;
    let cert_der = CertificateDer::from(cert.serialize_der().context("serialize cert")?);
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    let fingerprint = fp_sha256_hex(&cert_der);

    let mut crypto = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("select tls 1.3")?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .context("build server tls config")?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic = QuicServerConfig::try_from(crypto).context("build quic server crypto")?;
    Ok(ServerIdentity {
        config: quinn::ServerConfig::with_crypto(Arc::new(quic)),
        fingerprint,
    })
}

pub fn fp_sha256_hex(cert: &CertificateDer<'_>) -> String {
    let mut h = Sha256::new();
    h.update(cert.as_ref());
    let digest = h.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()
}

/// Accepts whatever certificate the server presents. The server identity is
/// regenerated on every start, so there is nothing to pin against; handshake
/// signatures are still verified.
#[derive(Debug)]
struct EphemeralServerVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for EphemeralServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Client config offering `alpn`. Senders use [`ALPN`]; anything else is
/// refused by the server during the handshake.
pub fn build_client_config(alpn: &[u8]) -> Result<quinn::ClientConfig> {
    let provider = provider();
    let mut crypto = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("select tls 1.3")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(EphemeralServerVerifier(provider)))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![alpn.to_vec()];

    let quic = QuicClientConfig::try_from(crypto).context("build quic client crypto")?;
    Ok(quinn::ClientConfig::new(Arc::new(quic)))
}
