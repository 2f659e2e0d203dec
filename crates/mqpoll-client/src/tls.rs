//! TLS transport using rustls.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::config::TlsConfig;
use crate::error::{ClientError, Result};
use crate::transport::{TcpTransport, Transport};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// rustls client session layered over a [`TcpTransport`].
pub struct TlsTransport {
    stream: StreamOwned<ClientConnection, TcpTransport>,
}

impl TlsTransport {
    /// Wrap `tcp` and complete the handshake.
    pub fn new(tcp: TcpTransport, config: &TlsConfig, hostname: &str) -> Result<Self> {
        let tls_config = build_client_config(config)?;

        let server_name = config.server_name.as_deref().unwrap_or(hostname);
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::Tls(format!("Invalid server name: {}", server_name)))?;

        let conn = ClientConnection::new(Arc::new(tls_config), server_name)
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        let mut transport = Self {
            stream: StreamOwned::new(conn, tcp),
        };
        transport.handshake(HANDSHAKE_TIMEOUT)?;
        Ok(transport)
    }

    fn handshake(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let StreamOwned { conn, sock, .. } = &mut self.stream;
        while conn.is_handshaking() {
            match conn.complete_io(sock) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() || !sock.poll_readable(remaining)? {
                        return Err(ClientError::Tls("handshake timed out".into()));
                    }
                }
                Err(e) => return Err(ClientError::Tls(e.to_string())),
            }
        }
        log::debug!("TLS handshake complete");
        Ok(())
    }
}

impl Transport for TlsTransport {
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let StreamOwned { conn, sock, .. } = &mut self.stream;
        loop {
            let state = conn
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if state.plaintext_bytes_to_read() > 0 || state.peer_has_closed() {
                return Ok(true);
            }
            match conn.read_tls(sock) {
                Ok(0) => return Ok(true),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !sock.poll_readable(remaining)? {
                return Ok(false);
            }
        }
    }

    fn close(&mut self) {
        self.stream.conn.send_close_notify();
        let _ = self.stream.conn.write_tls(&mut self.stream.sock);
        self.stream.sock.close();
    }

    fn reclaim(&mut self) {
        self.stream.sock.reclaim();
    }
}

impl Read for TlsTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

fn load_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ClientError::Tls(format!("Failed to open {}: {}", what, e)))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Tls(format!("Failed to parse {}: {}", what, e)))
}

/// Build a rustls ClientConfig from our TlsConfig.
pub fn build_client_config(config: &TlsConfig) -> Result<ClientConfig> {
    if config.accept_invalid_certs {
        log::warn!("TLS certificate verification disabled");
        return Ok(ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
            .with_no_client_auth());
    }

    let mut root_store = RootCertStore::empty();
    match &config.ca_cert {
        Some(ca_path) => {
            for cert in load_certs(ca_path, "CA cert")? {
                root_store
                    .add(cert)
                    .map_err(|e| ClientError::Tls(format!("Failed to add CA cert: {}", e)))?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);

    match (&config.client_cert, &config.client_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path, "client cert")?;
            let key_file = File::open(key_path)
                .map_err(|e| ClientError::Tls(format!("Failed to open client key: {}", e)))?;
            let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
                .map_err(|e| ClientError::Tls(format!("Failed to parse client key: {}", e)))?
                .ok_or_else(|| ClientError::Tls("No private key found in file".to_string()))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ClientError::Tls(format!("Failed to configure client auth: {}", e)))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any server certificate.
    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}
