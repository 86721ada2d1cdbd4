//! rustls configuration for https endpoints

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::error::{Error, Result};

/// Parse a hex SHA-256 fingerprint, with or without colons, into 32 bytes.
pub(crate) fn parse_fingerprint(s: &str) -> Result<[u8; 32]> {
    let hex_str: String = s.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect();
    let bytes = hex::decode(&hex_str)
        .map_err(|e| Error::Tls(format!("Invalid SSL fingerprint hex: {}", e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::Tls(format!(
            "SSL fingerprint must be 32 bytes (SHA-256), got {} bytes",
            bytes.len()
        ))
    })
}

/// How the server certificate is trusted when CA verification is off.
#[derive(Clone, Copy)]
enum Trust {
    /// Only the certificate with this SHA-256 digest
    Pinned([u8; 32]),
    /// Any certificate
    Any,
}

/// Verifier for pinned or unverified endpoints. Handshake signatures are
/// still checked with the provider's algorithms.
struct RelaxedVerifier {
    trust: Trust,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for RelaxedVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trust {
            Trust::Pinned(expected) => f
                .debug_struct("RelaxedVerifier")
                .field("pinned", &hex::encode(expected))
                .finish(),
            Trust::Any => f.debug_struct("RelaxedVerifier").field("pinned", &"any").finish(),
        }
    }
}

impl ServerCertVerifier for RelaxedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let expected = match self.trust {
            Trust::Any => return Ok(ServerCertVerified::assertion()),
            Trust::Pinned(expected) => expected,
        };
        let fingerprint = ring::digest::digest(&ring::digest::SHA256, end_entity.as_ref());
        if fingerprint.as_ref() == &expected {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "Certificate fingerprint mismatch: expected {}, got {}",
                hex::encode(expected),
                hex::encode(fingerprint.as_ref())
            )))
        }
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
            &self.provider.signature_verification_algorithms,
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
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build the rustls client config.
///
/// Priority: fingerprint pin, then `reject_unauthorized = false`, then
/// standard verification against the webpki roots.
pub(crate) fn build_tls_config(
    ssl_fingerprint: Option<&str>,
    reject_unauthorized: bool,
) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let trust = match ssl_fingerprint {
        Some(fp) => Some(Trust::Pinned(parse_fingerprint(fp)?)),
        None if !reject_unauthorized => Some(Trust::Any),
        None => None,
    };

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let config = match trust {
        Some(trust) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(RelaxedVerifier { trust, provider }))
            .with_no_client_auth(),
        None => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
    };
    Ok(config)
}
