//! Crash-safe file replacement.
//!
//! Output is staged in a temp file next to the destination and renamed over
//! it only after a successful flush + fsync, so readers see either the old
//! file or the complete new one, never a truncated write.

use std::fs::File;
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

/// Write `path` atomically. `write` receives the staging file; if it fails
/// the staging file is removed and `path` is left untouched.
pub fn write_atomic<F, E>(path: &Path, write: F) -> Result<(), E>
where
    F: FnOnce(&mut File) -> Result<(), E>,
    E: From<io::Error>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut staging = NamedTempFile::new_in(dir)?;
    write(staging.as_file_mut())?;
    staging.as_file().sync_all()?;

    let staged = staging.path().to_path_buf();
    staging.persist(path).map_err(|e| e.error)?;
    debug!(from = %staged.display(), to = %path.display(), "replaced file atomically");
    Ok(())
}
