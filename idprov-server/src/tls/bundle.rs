//! Hub certificate bundle on disk.
//!
//! Layout of the certificate folder:
//!
//! | File | Contents | Mode |
//! |------|----------|------|
//! | `caCert.pem` / `caKey.pem` | hub CA | 0644 / 0600 |
//! | `hubCert.pem` / `hubKey.pem` | TLS server certificate | 0644 / 0600 |
//! | `pluginCert.pem` / `pluginKey.pem` | client cert for OOB tooling (OU plugin) | 0644 / 0600 |

use std::path::{Path, PathBuf};

use idprov_auth::cert::{CA_VALIDITY_DAYS, SERVER_VALIDITY_DAYS};
use idprov_auth::{create_ca, create_client_cert, create_server_cert, CertAuthority, CertError, Role};
use zeroize::Zeroizing;

use idprov_files::{write_atomic, PRIVATE_MODE, PUBLIC_MODE};

pub const CA_CERT_FILE: &str = "caCert.pem";
pub const CA_KEY_FILE: &str = "caKey.pem";
pub const SERVER_CERT_FILE: &str = "hubCert.pem";
pub const SERVER_KEY_FILE: &str = "hubKey.pem";
pub const PLUGIN_CERT_FILE: &str = "pluginCert.pem";
pub const PLUGIN_KEY_FILE: &str = "pluginKey.pem";

/// Common name of the CA created by [`create_bundle`].
const CA_COMMON_NAME: &str = "IDProv Hub CA";

/// Common name of the plugin client certificate.
const PLUGIN_COMMON_NAME: &str = "plugin";

/// Plugin certificates are reissued on every bundle refresh.
const PLUGIN_VALIDITY_DAYS: u32 = 365;

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("missing {0}; run `idprov-server certs` first")]
    Missing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cert(#[from] CertError),
}

/// CA plus server credentials loaded from a certificate folder.
#[derive(Debug)]
pub struct CertBundle {
    pub ca: CertAuthority,
    pub server_cert_pem: String,
    pub server_key_pem: Zeroizing<String>,
}

fn read(dir: &Path, name: &str) -> Result<String, BundleError> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(BundleError::Missing(path));
    }
    std::fs::read_to_string(&path).map_err(|source| BundleError::Read { path, source })
}

fn write(dir: &Path, name: &str, contents: &str, mode: u32) -> Result<(), BundleError> {
    let path = dir.join(name);
    write_atomic(&path, contents.as_bytes(), mode).map_err(|source| BundleError::Write { path, source })
}

/// Load the CA and server certificate from `dir`.
pub fn load_bundle(dir: &Path) -> Result<CertBundle, BundleError> {
    let ca = CertAuthority::from_pem(&read(dir, CA_CERT_FILE)?, &read(dir, CA_KEY_FILE)?)?;
    Ok(CertBundle {
        ca,
        server_cert_pem: read(dir, SERVER_CERT_FILE)?,
        server_key_pem: Zeroizing::new(read(dir, SERVER_KEY_FILE)?),
    })
}

/// Create the certificate folder contents.
///
/// An existing CA is kept. The server certificate (for `names`) and the
/// plugin certificate are always reissued.
pub fn create_bundle(dir: &Path, names: &[String]) -> Result<CertBundle, BundleError> {
    std::fs::create_dir_all(dir).map_err(|source| BundleError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let ca = if dir.join(CA_CERT_FILE).exists() && dir.join(CA_KEY_FILE).exists() {
        tracing::info!(dir = %dir.display(), "Using existing CA");
        CertAuthority::from_pem(&read(dir, CA_CERT_FILE)?, &read(dir, CA_KEY_FILE)?)?
    } else {
        tracing::info!(dir = %dir.display(), "Creating hub CA");
        let ca = create_ca(CA_COMMON_NAME, CA_VALIDITY_DAYS)?;
        write(dir, CA_KEY_FILE, ca.key_pem(), PRIVATE_MODE)?;
        write(dir, CA_CERT_FILE, ca.cert_pem(), PUBLIC_MODE)?;
        ca
    };

    let (server_cert, server_key) = create_server_cert(names, &ca, SERVER_VALIDITY_DAYS)?;
    let server_key_pem = Zeroizing::new(server_key.serialize_pem());
    write(dir, SERVER_KEY_FILE, &server_key_pem, PRIVATE_MODE)?;
    write(dir, SERVER_CERT_FILE, &server_cert.pem, PUBLIC_MODE)?;

    let (plugin_cert, plugin_key) =
        create_client_cert(PLUGIN_COMMON_NAME, Role::Plugin, &ca, PLUGIN_VALIDITY_DAYS)?;
    write(dir, PLUGIN_KEY_FILE, &Zeroizing::new(plugin_key.serialize_pem()), PRIVATE_MODE)?;
    write(dir, PLUGIN_CERT_FILE, &plugin_cert.pem, PUBLIC_MODE)?;

    tracing::info!(dir = %dir.display(), names = ?names, "Certificate bundle written");

    Ok(CertBundle {
        ca,
        server_cert_pem: server_cert.pem,
        server_key_pem,
    })
}
