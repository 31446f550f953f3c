//! Filesystem helpers.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write `contents` to `path` so readers see either the old file or the new one.
///
/// The data goes to a temporary file in the same directory, which is then
/// renamed over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
  let dir = match path.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir,
    _ => Path::new("."),
  };
  fs::create_dir_all(dir)?;

  let mut temp = tempfile::NamedTempFile::new_in(dir)?;
  temp.write_all(contents)?;
  temp.as_file().sync_all()?;
  temp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether a file was removed.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
  match fs::remove_file(path) {
    Ok(()) => Ok(true),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(e) => Err(e),
  }
}
