//! PEM loading for the QUIC endpoints.

use std::path::Path;

use anyhow::{Context, Result};
use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

fn certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .with_context(|| format!("failed to open certificate file {}", path.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in {}", path.display());
    }
    Ok(certs)
}

/// Server configuration presenting `cert` with private key `key`.
pub fn server_config(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let chain = certificates(cert)?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("failed to load private key {}", key.display()))?;
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .context("certificate and private key do not match")
}

/// Client configuration trusting the CA certificates in `ca`.
pub fn client_config(ca: &Path) -> Result<rustls::ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in certificates(ca)? {
        roots
            .add(cert)
            .with_context(|| format!("invalid CA certificate in {}", ca.display()))?;
    }
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_bundle_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let err = client_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("no certificate found"));
    }

    #[test]
    fn missing_files_name_the_path() {
        let err = server_config(Path::new("/nonexistent/tls.crt"), Path::new("/nonexistent/tls.key"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/tls.crt"));
    }
}
