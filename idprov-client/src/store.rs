//! Files the device keeps between runs.
//!
//! | File | Contents | Mode |
//! |------|----------|------|
//! | `{deviceID}Key.pem` | device private key | 0600 |
//! | `{deviceID}Cert.pem` | issued client certificate | 0644 |
//! | `caCert.pem` | pinned hub CA | 0644 |

use std::path::{Path, PathBuf};

use idprov_auth::cert::parse_cert_pem;
use idprov_files::{write_atomic, PRIVATE_MODE, PUBLIC_MODE};
use rcgen::KeyPair;
use zeroize::Zeroizing;

use crate::error::ClientError;

pub const CA_CERT_FILE: &str = "caCert.pem";

/// Default certificate folder for a device client.
pub fn default_certs_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "idprov", "idprov")
        .map(|dirs| dirs.data_local_dir().join("certs"))
        .unwrap_or_else(|| PathBuf::from("certs"))
}

/// The three client files of one device.
#[derive(Debug, Clone)]
pub struct ClientFiles {
    dir: PathBuf,
    device_id: String,
}

impl ClientFiles {
    pub fn new(dir: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            device_id: device_id.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(format!("{}Key.pem", self.device_id))
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(format!("{}Cert.pem", self.device_id))
    }

    pub fn ca_path(&self) -> PathBuf {
        self.dir.join(CA_CERT_FILE)
    }

    /// The pinned CA, if one was saved.
    pub fn load_ca(&self) -> Result<Option<String>, ClientError> {
        read_optional(&self.ca_path())
    }

    /// The client certificate, if one was saved.
    pub fn load_cert(&self) -> Result<Option<String>, ClientError> {
        read_optional(&self.cert_path())
    }

    /// Load the device key, generating and saving a new one when none exists.
    pub fn load_or_create_key(&self) -> Result<KeyPair, ClientError> {
        let path = self.key_path();
        if let Some(pem) = read_optional(&path)? {
            let pem = Zeroizing::new(pem);
            return KeyPair::from_pem(&pem)
                .map_err(|e| ClientError::Key(format!("{}: {e}", path.display())));
        }

        let key = idprov_auth::create_ecdsa_keys()?;
        let pem = Zeroizing::new(key.serialize_pem());
        self.write(&path, pem.as_bytes(), PRIVATE_MODE)?;
        tracing::info!(path = %path.display(), "Generated device key");
        Ok(key)
    }

    pub fn save_ca(&self, pem: &str) -> Result<(), ClientError> {
        self.write(&self.ca_path(), pem.as_bytes(), PUBLIC_MODE)
    }

    pub fn save_cert(&self, pem: &str) -> Result<(), ClientError> {
        self.write(&self.cert_path(), pem.as_bytes(), PUBLIC_MODE)
    }

    /// Save the CA and client certificate from an approved response, then
    /// check both parse.
    pub fn save_credentials(&self, ca_pem: &str, cert_pem: &str) -> Result<(), ClientError> {
        self.save_ca(ca_pem)?;
        self.save_cert(cert_pem)?;

        for path in [self.ca_path(), self.cert_path()] {
            let pem = read_optional(&path)?.unwrap_or_default();
            parse_cert_pem(&pem).map_err(|e| {
                ClientError::InvalidCertPayload(format!("{}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &[u8], mode: u32) -> Result<(), ClientError> {
        write_atomic(path, contents, mode).map_err(|source| ClientError::File {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ClientError> {
    idprov_files::read_optional(path).map_err(|source| ClientError::File {
        path: path.to_path_buf(),
        source,
    })
}
