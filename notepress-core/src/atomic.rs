//! Crash-safe file replacement.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write `contents` to `path` through a sibling temp file and a rename, so a
/// reader never observes a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// What [`write_if_changed`] found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub written: bool,
    /// Bytes on disk before the call, `None` when the file did not exist.
    pub previous: Option<Vec<u8>>,
}

/// Write only when the on-disk bytes differ.
pub fn write_if_changed(path: &Path, contents: &[u8]) -> io::Result<Replaced> {
    let previous = match fs::read(path) {
        Ok(existing) => Some(existing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    let written = previous.as_deref() != Some(contents);
    if written {
        write_atomic(path, contents)?;
    }
    Ok(Replaced { written, previous })
}

/// Undo a [`write_if_changed`]: put the old bytes back, or remove a file that
/// did not exist before.
pub fn restore(path: &Path, replaced: &Replaced) -> io::Result<()> {
    if !replaced.written {
        return Ok(());
    }
    match &replaced.previous {
        Some(bytes) => write_atomic(path, bytes),
        None => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}
