//! Mutual TLS client setup for the broker connection

use std::sync::Arc;

use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use thiserror_no_std::Error;
use willow_core::config::TlsCredentials;

#[derive(Error, Debug)]
pub enum TlsSetupError {
    #[error("{what}: {details}")]
    Pem { what: &'static str, details: String },
    #[error("TLS configuration rejected: {0}")]
    Config(String),
    #[error("invalid broker name {0:?}")]
    ServerName(String),
}

fn pem_error(what: &'static str) -> impl Fn(rustls::pki_types::pem::Error) -> TlsSetupError {
    move |e| TlsSetupError::Pem {
        what,
        details: e.to_string(),
    }
}

fn config_error(e: rustls::Error) -> TlsSetupError {
    TlsSetupError::Config(e.to_string())
}

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// Build a client configuration that trusts only `ca_cert_pem` and presents
/// the node's certificate chain.
pub fn client_config(credentials: &TlsCredentials<'_>) -> Result<Arc<ClientConfig>, TlsSetupError> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(credentials.ca_cert_pem.as_bytes()) {
        roots
            .add(cert.map_err(pem_error("CA certificate"))?)
            .map_err(config_error)?;
    }
    if roots.is_empty() {
        return Err(TlsSetupError::Pem {
            what: "CA certificate",
            details: String::from("no certificate found"),
        });
    }

    let chain = CertificateDer::pem_slice_iter(credentials.client_cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error("client certificate"))?;
    let key = PrivateKeyDer::from_pem_slice(credentials.client_key_pem.as_bytes())
        .map_err(pem_error("client key"))?;

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(config_error)?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(config_error)?;

    Ok(Arc::new(config))
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsSetupError> {
    ServerName::try_from(host.to_owned()).map_err(|_| TlsSetupError::ServerName(host.to_owned()))
}
