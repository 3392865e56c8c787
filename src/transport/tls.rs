//! TLS configuration and CA bundle loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;
use crate::transport::{TransportError, TransportResult};

/// Build a connector that trusts the CA bundle named in `config`.
pub fn load_connector(config: &TlsConfig) -> TransportResult<TlsConnector> {
    let ca_path = Path::new(&config.ca_path);
    if !ca_path.exists() {
        return Err(TransportError::Tls(format!(
            "CA bundle not found: {:?}",
            ca_path
        )));
    }

    let mut reader = BufReader::new(File::open(ca_path)?);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots
            .add(cert?)
            .map_err(|e| TransportError::Tls(format!("invalid CA certificate: {}", e)))?;
    }
    if roots.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates found in {:?}",
            ca_path
        )));
    }

    let tls = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls)))
}

/// Name to verify for a member: the configured override, or the member's host.
pub fn server_name(override_name: Option<&str>, host: &str) -> TransportResult<ServerName<'static>> {
    let name = override_name.unwrap_or(host).to_string();
    ServerName::try_from(name)
        .map_err(|e| TransportError::Tls(format!("invalid server name: {}", e)))
}
