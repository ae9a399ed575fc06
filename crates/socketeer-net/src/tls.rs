//! TLS context built once when the transport opens.
//!
//! Servers load a PEM certificate chain and private key. An encrypted
//! PKCS#8 key (`ENCRYPTED PRIVATE KEY`) is decrypted with the configured
//! passphrase before it reaches rustls. Clients either
//! accept any peer certificate (`allow_self_signed`, the default) or trust
//! only the certificates found in the configured certificate file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use pkcs8::der::Document;
use pkcs8::EncryptedPrivateKeyInfo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, ServerConfig,
    ServerConnection, SignatureScheme,
};
use socketeer_config::TlsConfig;
use tracing::debug;

use crate::error::{NetError, NetResult};

/// Largest amount of plaintext rustls buffers while a session cannot write.
const SESSION_BUFFER_LIMIT: usize = 4 * 1024 * 1024;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// Shared TLS settings for every connection of one transport.
#[derive(Clone)]
pub enum TlsContext {
    /// Accepting side.
    Server(Arc<ServerConfig>),
    /// Connecting side.
    Client {
        /// Client settings.
        config: Arc<ClientConfig>,
        /// Name sent in SNI.
        server_name: ServerName<'static>,
    },
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server(_) => f.write_str("TlsContext::Server"),
            Self::Client { server_name, .. } => f
                .debug_struct("TlsContext::Client")
                .field("server_name", server_name)
                .finish(),
        }
    }
}

impl TlsContext {
    /// Build the server context from certificate and key files.
    pub fn server(config: &TlsConfig) -> NetResult<Self> {
        let cert_path = config
            .certificate
            .as_deref()
            .ok_or_else(|| NetError::tls("no certificate configured"))?;
        let certs = load_certs(cert_path)?;

        let key_path = config.key_path().map_or(cert_path, |p| p.as_path());
        let key = load_key(key_path, config.passphrase.as_deref())?;

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| NetError::tls(format!("server config: {e}")))?;
        Ok(Self::Server(Arc::new(server)))
    }

    /// Build the client context for `host`.
    pub fn client(config: &TlsConfig, host: &str) -> NetResult<Self> {
        let client = if config.allow_self_signed {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth()
        } else {
            let anchors = config
                .certificate
                .as_deref()
                .ok_or_else(|| NetError::tls("verification requires a certificate file to trust"))?;
            let mut roots = RootCertStore::empty();
            for cert in load_certs(anchors)? {
                roots
                    .add(cert)
                    .map_err(|e| NetError::tls(format!("trust anchor: {e}")))?;
            }
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        let name = config.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| NetError::tls(format!("invalid server name '{name}': {e}")))?;

        Ok(Self::Client {
            config: Arc::new(client),
            server_name,
        })
    }

    /// Start a session for a new stream.
    pub(crate) fn session(&self) -> NetResult<rustls::Connection> {
        let mut conn: rustls::Connection = match self {
            Self::Server(config) => ServerConnection::new(Arc::clone(config))
                .map_err(|e| NetError::tls(e.to_string()))?
                .into(),
            Self::Client {
                config,
                server_name,
            } => ClientConnection::new(Arc::clone(config), server_name.clone())
                .map_err(|e| NetError::tls(e.to_string()))?
                .into(),
        };
        conn.set_buffer_limit(Some(SESSION_BUFFER_LIMIT));
        Ok(conn)
    }
}

fn open(path: &Path) -> NetResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| NetError::tls(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> NetResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NetError::tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(NetError::tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path, passphrase: Option<&str>) -> NetResult<PrivateKeyDer<'static>> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| NetError::tls(format!("{}: {e}", path.display())))?;

    if let Some(block) = pem_block(&pem, ENCRYPTED_KEY_LABEL) {
        let passphrase = passphrase.ok_or_else(|| {
            NetError::tls(format!(
                "{} holds an encrypted key but no passphrase is configured",
                path.display()
            ))
        })?;
        return decrypt_key(block, passphrase)
            .map_err(|e| NetError::tls(format!("{}: {e}", path.display())));
    }

    if passphrase.is_some() {
        debug!(path = %path.display(), "Key is not encrypted, passphrase unused");
    }
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| NetError::tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| NetError::tls(format!("no private key found in {}", path.display())))
}

/// The first PEM block with `label`, markers included.
fn pem_block<'a>(pem: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = pem.find(&begin)?;
    let stop = pem[start..].find(&end)? + start + end.len();
    Some(&pem[start..stop])
}

/// Decrypt a PBES2 `EncryptedPrivateKeyInfo` into a PKCS#8 key.
fn decrypt_key(block: &str, passphrase: &str) -> Result<PrivateKeyDer<'static>, String> {
    let (label, document) =
        Document::from_pem(block).map_err(|e| format!("malformed encrypted key: {e}"))?;
    if label != ENCRYPTED_KEY_LABEL {
        return Err(format!("unexpected PEM label '{label}'"));
    }
    let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes())
        .map_err(|e| format!("malformed encrypted key: {e}"))?;
    let secret = info
        .decrypt(passphrase)
        .map_err(|e| format!("cannot decrypt key (wrong passphrase?): {e}"))?;
    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(secret.as_bytes().to_vec())))
}

/// Accepts every server certificate.
///
/// Peer verification is disabled so self-signed deployments work; callers
/// needing strict verification set `allow_self_signed = false`.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
