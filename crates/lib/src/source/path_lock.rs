//! Path-scoped file locks.
//!
//! Writers of a cache path (a git mirror or an exported source tree) take an
//! exclusive advisory lock on a sibling `<path>.lock` file. Concurrent pakt
//! processes fetching the same package therefore serialize, while unrelated
//! paths proceed in parallel. The lock is released when the guard drops.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Serialize, Deserialize)]
pub struct PathLockMetadata {
  pub pid: u32,
  pub started_at_unix: u64,
  pub target: PathBuf,
}

#[derive(Debug, Error)]
pub enum PathLockError {
  #[error("'{target}' is locked by PID {pid} (lock file {lock_path})")]
  Contention { target: PathBuf, pid: u32, lock_path: PathBuf },

  #[error("'{target}' is locked by another process (lock file {lock_path})")]
  ContentionUnknown { target: PathBuf, lock_path: PathBuf },

  #[error("failed to create lock directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock '{path}': {source}")]
  Lock {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Exclusive lock over one filesystem path.
#[derive(Debug)]
pub struct PathLock {
  file: File,
  lock_path: PathBuf,
}

impl PathLock {
  /// Lock file location for `target`.
  pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
  }

  /// Wait until `target` can be locked exclusively.
  pub fn acquire(target: &Path) -> Result<Self, PathLockError> {
    let (file, lock_path) = open_lock_file(target)?;
    trace!(lock = %lock_path.display(), "waiting for path lock");
    lock(&file, true).map_err(|source| PathLockError::Lock {
      path: lock_path.clone(),
      source,
    })?;
    Self::locked(file, lock_path, target)
  }

  /// Lock `target` if nobody else holds it.
  pub fn try_acquire(target: &Path) -> Result<Self, PathLockError> {
    let (file, lock_path) = open_lock_file(target)?;
    if let Err(err) = lock(&file, false) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(contention_error(target, &lock_path));
      }
      return Err(PathLockError::Lock { path: lock_path, source: err });
    }
    Self::locked(file, lock_path, target)
  }

  fn locked(file: File, lock_path: PathBuf, target: &Path) -> Result<Self, PathLockError> {
    let metadata = PathLockMetadata {
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      target: target.to_path_buf(),
    };

    // Metadata only feeds contention messages; failing to write it is harmless.
    let write = || -> io::Result<()> {
      file.set_len(0)?;
      let mut writer = io::BufWriter::new(&file);
      serde_json::to_writer(&mut writer, &metadata).map_err(io::Error::other)?;
      writer.flush()
    };
    if let Err(e) = write() {
      debug!(lock = %lock_path.display(), error = %e, "failed to write lock metadata");
    }

    debug!(lock = %lock_path.display(), "path lock acquired");
    Ok(Self { file, lock_path })
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Metadata as written by this holder.
  pub fn read_metadata(&self) -> io::Result<PathLockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }
}

fn open_lock_file(target: &Path) -> Result<(File, PathBuf), PathLockError> {
  let lock_path = PathLock::lock_path_for(target);
  if let Some(parent) = lock_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|source| PathLockError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(&lock_path)
    .map_err(|source| PathLockError::Open {
      path: lock_path.clone(),
      source,
    })?;

  Ok((file, lock_path))
}

fn contention_error(target: &Path, lock_path: &Path) -> PathLockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<PathLockMetadata>(&contents)
    {
      return PathLockError::Contention {
        target: target.to_path_buf(),
        pid: metadata.pid,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  PathLockError::ContentionUnknown {
    target: target.to_path_buf(),
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if blocking {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if blocking {
    LOCKFILE_EXCLUSIVE_LOCK
  } else {
    LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK
  };

  // SAFETY: OVERLAPPED is plain data and valid when zeroed; the handle is open.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
