// Shared transport configuration and the per-client HTTP session.
//
// Every vendor client owns exactly one `HttpSession`. The session wraps a
// `reqwest::Client` behind an `ArcSwap` so the timeout can be changed live:
// new requests pick up the rebuilt client, requests already in flight finish
// on the old one, and no stream has to reconnect.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::Error;

const USER_AGENT: &str = concat!("smarthome/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system / webpki certificate store.
    System,
    /// Trust a custom CA certificate loaded from a PEM file.
    CustomCa(PathBuf),
    /// Trust a pinned CA certificate given as PEM bytes.
    PinnedCa(Arc<[u8]>),
    /// Accept any certificate (bridges with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    pub fn new(tls: TlsMode, timeout: Duration) -> Self {
        Self { tls, timeout }
    }

    /// Build a `reqwest::Client` with additional default headers.
    pub fn build_client_with_headers(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                builder = builder.add_root_certificate(parse_pem(&cert_pem)?);
            }
            TlsMode::PinnedCa(pem) => {
                builder = builder.add_root_certificate(parse_pem(pem)?);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        self.build_client_with_headers(HeaderMap::new())
    }
}

fn parse_pem(pem: &[u8]) -> Result<reqwest::Certificate, Error> {
    reqwest::Certificate::from_pem(pem).map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))
}

/// Header value for a credential, marked sensitive so it never lands in
/// debug output.
pub fn secret_header(value: &str) -> Result<HeaderValue, Error> {
    let mut header = HeaderValue::from_str(value).map_err(|e| Error::Authentication {
        message: format!("invalid credential header value: {e}"),
    })?;
    header.set_sensitive(true);
    Ok(header)
}

// ── HttpSession ──────────────────────────────────────────────────────

/// One HTTP session per vendor client, with a live-adjustable timeout.
///
/// The timeout is applied per request (not baked into the client) so
/// streaming reads are not cut off by it; `set_timeout` additionally
/// rebuilds the client so the connect timeout follows.
pub struct HttpSession {
    config: ArcSwap<TransportConfig>,
    headers: HeaderMap,
    client: ArcSwap<reqwest::Client>,
}

impl HttpSession {
    pub fn new(config: TransportConfig) -> Result<Self, Error> {
        Self::with_headers(config, HeaderMap::new())
    }

    /// Build a session whose client sends `headers` on every request.
    pub fn with_headers(config: TransportConfig, headers: HeaderMap) -> Result<Self, Error> {
        let client = config.build_client_with_headers(headers.clone())?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            headers,
            client: ArcSwap::from_pointee(client),
        })
    }

    /// Wrap an existing `reqwest::Client` (tests, shared pools).
    pub fn from_client(client: reqwest::Client, config: TransportConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            headers: HeaderMap::new(),
            client: ArcSwap::from_pointee(client),
        }
    }

    /// The current client. Cheap: `reqwest::Client` is reference counted.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::clone(&self.client.load())
    }

    /// The per-request timeout currently in effect.
    pub fn timeout(&self) -> Duration {
        self.config.load().timeout
    }

    pub fn tls(&self) -> TlsMode {
        self.config.load().tls.clone()
    }

    /// Change the timeout without tearing down open streams.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), Error> {
        let mut config = TransportConfig::clone(&self.config.load());
        if config.timeout == timeout {
            return Ok(());
        }
        config.timeout = timeout;
        let client = config.build_client_with_headers(self.headers.clone())?;
        self.client.store(Arc::new(client));
        self.config.store(Arc::new(config));
        tracing::debug!(timeout_secs = timeout.as_secs(), "session timeout updated");
        Ok(())
    }
}

// ── Insecure TLS for WebSocket upgrades ──────────────────────────────

/// A rustls client config that accepts any server certificate.
///
/// Local bridges (Dirigera, Hue) serve self-signed certificates; reqwest
/// has a builder switch for this but the WebSocket upgrade needs a raw
/// rustls config.
pub fn insecure_rustls_config() -> Result<Arc<rustls::ClientConfig>, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls_pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
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
        cert: &rustls_pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_timeout_swaps_client_config() {
        let session = HttpSession::new(TransportConfig::default()).unwrap();
        assert_eq!(session.timeout(), Duration::from_secs(5));

        session.set_timeout(Duration::from_secs(12)).unwrap();
        assert_eq!(session.timeout(), Duration::from_secs(12));
    }
}
