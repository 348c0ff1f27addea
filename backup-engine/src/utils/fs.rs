//! Small filesystem helpers shared by the archive and snapshot code.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::warn;

/// Hex-encoded (lower-case) SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Best-effort fsync of a directory so renames and creations inside it are durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Failed to sync directory");
    }
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) {}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc")?;
        assert_eq!(
            sha256_file(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }

    #[test]
    fn test_remove_if_exists_tolerates_missing() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("gone");
        remove_if_exists(&path)?;
        std::fs::write(&path, b"x")?;
        remove_if_exists(&path)?;
        assert!(!path.exists());
        Ok(())
    }
}
