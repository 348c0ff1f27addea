//! Swapping a verified stage file in for the live database.

use std::fs;
use std::io;
use std::path::Path;

/// The file-system moves used by the swap. Injectable so tests can fail a
/// specific step.
pub trait FsOps: Send + Sync {
    /// Replace `live` with `stage` in one step, leaving the previous live file
    /// reachable at `aside`.
    fn atomic_replace(&self, stage: &Path, live: &Path, aside: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

pub struct StdFsOps;

impl FsOps for StdFsOps {
    #[cfg(unix)]
    fn atomic_replace(&self, stage: &Path, live: &Path, aside: &Path) -> io::Result<()> {
        match fs::hard_link(live, aside) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Err(e) = fs::rename(stage, live) {
            let _ = crate::utils::fs::remove_if_exists(aside);
            return Err(e);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn atomic_replace(&self, _stage: &Path, _live: &Path, _aside: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "atomic replace with backup is not available on this platform",
        ))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Errors after which the move-based swap is still worth trying.
pub(super) fn is_recoverable(e: &io::Error) -> bool {
    !matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::OutOfMemory)
}

/// `-wal`, `-shm` and `-journal` files next to `database`.
pub(super) fn side_files(database: &Path) -> Vec<std::path::PathBuf> {
    ["-wal", "-shm", "-journal"]
        .iter()
        .map(|suffix| {
            let mut name = database.as_os_str().to_owned();
            name.push(suffix);
            name.into()
        })
        .collect()
}
