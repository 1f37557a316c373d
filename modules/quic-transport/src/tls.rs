//! rustls client setup for each credential mode.

use quic_probe::{CredentialMode, TransportError};
use quinn::crypto::rustls::QuicClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) fn client_crypto(mode: CredentialMode, alpn: &[String]) -> Result<QuicClientConfig, TransportError> {
    let provider = Arc::new(ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Config(e.to_string()))?;
    let mut crypto = match mode {
        CredentialMode::Strict => builder.with_root_certificates(platform_roots()?).with_no_client_auth(),
        CredentialMode::BuiltIn => builder.with_root_certificates(bundled_roots()).with_no_client_auth(),
        CredentialMode::Unsecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth(),
    };
    crypto.alpn_protocols = alpn.iter().map(|a| a.as_bytes().to_vec()).collect();
    QuicClientConfig::try_from(crypto).map_err(|e| TransportError::Config(format!("{e:?}")))
}

fn platform_roots() -> Result<RootCertStore, TransportError> {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!(error = %e, "could not load part of the platform trust store");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "platform trust store loaded");
    if added == 0 {
        return Err(TransportError::Config("platform trust store has no usable certificates".into()));
    }
    Ok(roots)
}

fn bundled_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Skips chain and name checks but still verifies handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_roots_are_not_empty() {
        assert!(!bundled_roots().is_empty());
    }

    #[test]
    fn relaxed_modes_build() {
        let alpn = vec!["h3".to_string(), "hq-interop".to_string()];
        assert!(client_crypto(CredentialMode::BuiltIn, &alpn).is_ok());
        assert!(client_crypto(CredentialMode::Unsecure, &alpn).is_ok());
    }
}
