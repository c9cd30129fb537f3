//! PEM files on disk.
//!
//! The server archive, the certificate bundle and the device store all keep
//! small PEM files that other processes read while they are being replaced.
//! Writes go through a temporary file in the target directory and a rename,
//! so a reader sees either the old contents or the new ones.

use std::io::Write;
use std::path::Path;

/// Mode of private keys and archived certificates.
pub const PRIVATE_MODE: u32 = 0o600;

/// Mode of certificates meant to be shared.
pub const PUBLIC_MODE: u32 = 0o644;

/// Write `contents` to `path` with permission bits `mode`, creating the
/// parent directory if needed.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a text file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parent_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("caCert.pem");

        write_atomic(&path, b"first", PUBLIC_MODE).unwrap();
        write_atomic(&path, b"second", PUBLIC_MODE).unwrap();

        assert_eq!(read_optional(&path).unwrap().as_deref(), Some("second"));
        // Only the target is left behind.
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_optional(&dir.path().join("absent.pem")).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let key = dir.path().join("key.pem");
        let cert = dir.path().join("cert.pem");
        write_atomic(&key, b"k", PRIVATE_MODE).unwrap();
        write_atomic(&cert, b"c", PUBLIC_MODE).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&key), 0o600);
        assert_eq!(mode(&cert), 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_tightens_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deviceKey.pem");
        write_atomic(&path, b"old", PUBLIC_MODE).unwrap();
        write_atomic(&path, b"new", PRIVATE_MODE).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
