//! Archive of issued device certificates.
//!
//! Each approved device gets `{dir}/{deviceID}Cert.pem`, replaced atomically
//! on renewal. The archive is optional: without a directory nothing is kept.

use std::path::{Path, PathBuf};

use idprov_auth::validate_device_id;

use idprov_files::{read_optional, write_atomic, PRIVATE_MODE};

/// File name suffix of archived certificates.
const CERT_SUFFIX: &str = "Cert.pem";

/// Errors from the certificate archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("device ID cannot be used as a file name: {0}")]
    InvalidDeviceId(#[from] idprov_auth::DeviceIdError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Directory of issued certificates, or nothing.
#[derive(Debug, Clone, Default)]
pub struct CertArchive {
    dir: Option<PathBuf>,
}

impl CertArchive {
    /// An empty path disables archiving.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            dir: (!dir.as_os_str().is_empty()).then_some(dir),
        }
    }

    /// An archive that keeps nothing.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn cert_path(dir: &Path, device_id: &str) -> Result<PathBuf, ArchiveError> {
        validate_device_id(device_id)?;
        Ok(dir.join(format!("{device_id}{CERT_SUFFIX}")))
    }

    /// Store the certificate issued to `device_id`, replacing any earlier one.
    pub fn save(&self, device_id: &str, cert_pem: &str) -> Result<(), ArchiveError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = Self::cert_path(dir, device_id)?;
        write_atomic(&path, cert_pem.as_bytes(), PRIVATE_MODE)
            .map_err(|source| ArchiveError::Write { path, source })
    }

    /// Certificate last issued to `device_id`, if archived.
    pub fn lookup(&self, device_id: &str) -> Option<String> {
        let dir = self.dir.as_deref()?;
        let path = Self::cert_path(dir, device_id).ok()?;
        read_optional(&path).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_lookup() {
        let dir = TempDir::new().unwrap();
        let archive = CertArchive::new(dir.path());

        archive.save("device1", "PEM-1").unwrap();
        assert_eq!(archive.lookup("device1").as_deref(), Some("PEM-1"));
        assert!(dir.path().join("device1Cert.pem").exists());

        archive.save("device1", "PEM-2").unwrap();
        assert_eq!(archive.lookup("device1").as_deref(), Some("PEM-2"));
        assert_eq!(archive.lookup("device2"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_archived_cert_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let archive = CertArchive::new(dir.path());
        archive.save("device1", "PEM").unwrap();

        let mode = std::fs::metadata(dir.path().join("device1Cert.pem"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_disabled_archive_keeps_nothing() {
        let archive = CertArchive::new("");
        assert!(archive.dir().is_none());
        archive.save("device1", "PEM").unwrap();
        assert_eq!(archive.lookup("device1"), None);
    }

    #[test]
    fn test_unsafe_device_id_is_refused() {
        let dir = TempDir::new().unwrap();
        let archive = CertArchive::new(dir.path());
        assert!(matches!(
            archive.save("../escape", "PEM"),
            Err(ArchiveError::InvalidDeviceId(_))
        ));
    }

    #[test]
    fn test_unwritable_dir_reports_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file where the directory should be.
        let archive = CertArchive::new(blocker.join("sub"));
        assert!(matches!(
            archive.save("device1", "PEM"),
            Err(ArchiveError::Write { .. })
        ));
    }
}
