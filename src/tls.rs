//! TLS credential and configuration helpers
// (c) 2025 Ross Younger
//!
//! The peer itself does not mandate any particular verification policy; the
//! caller supplies a rustls configuration when dialling or listening. These
//! helpers cover the common cases: loading a PEM keypair from disk,
//! generating a throwaway self-signed certificate, and building client
//! configurations that either pin the server's certificate or (for testing)
//! skip verification altogether.

use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls_pki_types::pem::PemObject as _;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tracing::debug;

use crate::error::{Error, Result};

/// In-memory TLS credentials: a certificate chain and its private key.
#[allow(missing_debug_implementations)] // holds key material
pub struct Credentials {
    /// The certificate chain, leaf first
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// The private key matching the leaf certificate
    pub key: PrivateKeyDer<'static>,
}

impl Credentials {
    /// Generates a self-signed certificate for this host.
    ///
    /// Suitable for testing, or for deployments where the peers exchange
    /// and pin certificates out of band.
    pub fn generate() -> Result<Self> {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "unknown.host.invalid".to_string());
        debug!("generating self-signed certificate for {hostname}");
        let keypair =
            rcgen::generate_simple_self_signed([hostname, "localhost".to_string()])
                .map_err(|e| Error::TlsConfig(e.to_string()))?;
        Ok(Self {
            cert_chain: vec![keypair.cert.der().clone()],
            key: PrivateKeyDer::Pkcs8(keypair.signing_key.serialize_der().into()),
        })
    }

    /// Loads a PEM keypair from disk.
    pub fn load(key_path: &Path, cert_path: &Path) -> Result<Self> {
        let cert_chain = CertificateDer::pem_file_iter(cert_path)
            .map_err(|e| Error::TlsConfig(format!("{}: {e}", cert_path.display())))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::TlsConfig(format!("{}: {e}", cert_path.display())))?;
        let key = PrivateKeyDer::from_pem_file(key_path)
            .map_err(|e| Error::TlsConfig(format!("{}: {e}", key_path.display())))?;
        Ok(Self { cert_chain, key })
    }
}

/// Obtains server credentials: loaded from `key_path`/`cert_path` if given,
/// or a freshly generated self-signed certificate when both are absent.
pub fn certificate(key_path: Option<&Path>, cert_path: Option<&Path>) -> Result<Credentials> {
    match (key_path, cert_path) {
        (Some(key), Some(cert)) => {
            if key.exists() || cert.exists() {
                Credentials::load(key, cert)
            } else {
                Credentials::generate()
            }
        }
        _ => Credentials::generate(),
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Builds a server TLS configuration from credentials.
/// Clients are not asked for certificates.
pub fn server_config(creds: Credentials) -> Result<rustls::ServerConfig> {
    rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::TlsConfig(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(creds.cert_chain, creds.key)
        .map_err(|e| Error::TlsConfig(e.to_string()))
}

/// Builds a client TLS configuration that trusts exactly the given server
/// certificate. This is the sane choice when certificates are exchanged out
/// of band.
pub fn client_config(server_cert: &CertificateDer<'_>) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(server_cert.clone().into_owned())
        .map_err(|e| Error::TlsConfig(e.to_string()))?;
    Ok(rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::TlsConfig(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Builds a client TLS configuration that accepts ANY server certificate.
///
/// Traffic is still encrypted, but the client has no idea who it is talking
/// to. For testing only.
pub fn client_config_insecure() -> Result<rustls::ClientConfig> {
    let provider = provider();
    Ok(rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::TlsConfig(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth())
}

/// Server certificate "verifier" that waves everything through.
/// Signatures are still checked, so the peer at least holds the key it
/// presented.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
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
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{Credentials, certificate, client_config_insecure, server_config};

    use littertray::LitterTray;
    use std::path::Path;

    #[test]
    fn generate_works() {
        let creds = Credentials::generate().unwrap();
        assert_eq!(creds.cert_chain.len(), 1);
    }

    #[test]
    fn server_config_from_generated() {
        let creds = Credentials::generate().unwrap();
        let _ = server_config(creds).unwrap();
    }

    #[test]
    fn insecure_client_config_builds() {
        let _ = client_config_insecure().unwrap();
    }

    #[test]
    fn certificate_generates_when_paths_absent() {
        let _ = certificate(None, None).unwrap();
        let _ = certificate(
            Some(Path::new("/nonexistent/key.pem")),
            Some(Path::new("/nonexistent/cert.pem")),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn round_trip_via_pem_files() {
        LitterTray::try_with_async(async |tray| {
            let keypair = rcgen::generate_simple_self_signed(["localhost".to_string()])?;
            let _ = tray.create_text("cert.pem", &keypair.cert.pem())?;
            let _ = tray.create_text("key.pem", &keypair.signing_key.serialize_pem())?;

            let creds = certificate(Some(Path::new("key.pem")), Some(Path::new("cert.pem")))?;
            assert_eq!(creds.cert_chain.len(), 1);
            let _ = server_config(creds)?;
            Ok(())
        })
        .await
        .unwrap();
    }
}
