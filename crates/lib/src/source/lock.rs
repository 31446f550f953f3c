//! Lock file management.
//!
//! The lock file (`pakt.lock`) sits next to the recipe and records the
//! version and source revision every package resolved to. It is how a later
//! run notices that a floating branch moved.
//!
//! # Lock File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "packages": {
//!     "libuv": {
//!       "version": "1.48.0",
//!       "type": "git",
//!       "url": "https://github.com/libuv/libuv.git",
//!       "rev": "e9f29cb984231524e3931aa0ae2c5dae1a32884e",
//!       "lastModified": 1733667300
//!     },
//!     "dbus-cxx": {
//!       "version": "2.4.0",
//!       "type": "branch",
//!       "url": "https://github.com/dbus-cxx/dbus-cxx.git",
//!       "branch": "conan-windows",
//!       "rev": "0c52c5b3f6b1a6f5c1d9e9d7ed8b1c2f3a4b5c6d"
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::types::SourceRef;
use crate::util::fs::write_atomic;

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
  pub version: u32,
  pub packages: BTreeMap<String, LockedPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedPackage {
  /// Resolved package version.
  pub version: String,

  /// Source kind: "git", "branch" or "path".
  #[serde(rename = "type")]
  pub type_: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<String>,

  /// Commit hash, or "local" for path sources.
  pub rev: String,

  /// Unix timestamp of when this revision was first recorded.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_modified: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to read lock file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse lock file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      packages: BTreeMap::new(),
    }
  }

  /// Load a lock file.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(LockError::Read(e)),
    };

    let lock: LockFile = serde_json::from_str(&content).map_err(LockError::Parse)?;

    if lock.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(lock.version));
    }

    Ok(Some(lock))
  }

  /// Save as pretty-printed JSON, replacing the file atomically.
  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let mut content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    content.push('\n');
    write_atomic(path, content.as_bytes()).map_err(LockError::Write)
  }

  pub fn get(&self, name: &str) -> Option<&LockedPackage> {
    self.packages.get(name)
  }

  /// Record a package, returning whether the lock changed.
  ///
  /// An unchanged entry keeps its original timestamp.
  pub fn record(&mut self, name: &str, entry: LockedPackage) -> bool {
    match self.packages.get(name) {
      Some(existing) if existing.same_pin(&entry) => false,
      _ => {
        info!(package = name, rev = %entry.rev, "locking package");
        self.packages.insert(name.to_string(), entry);
        true
      }
    }
  }

  /// Drop entries for packages no longer in the graph, returning whether any were removed.
  pub fn retain_packages(&mut self, names: &BTreeSet<String>) -> bool {
    let before = self.packages.len();
    self.packages.retain(|name, _| {
      let keep = names.contains(name);
      if !keep {
        warn!(package = %name, "removing stale package from lock file");
      }
      keep
    });
    before != self.packages.len()
  }
}

impl LockedPackage {
  pub fn new(version: &str, source: &SourceRef, rev: &str) -> Self {
    let branch = match source {
      SourceRef::Floating { branch, .. } => Some(branch.clone()),
      _ => None,
    };
    Self {
      version: version.to_string(),
      type_: source.kind().to_string(),
      url: source.url().map(str::to_string),
      branch,
      rev: rev.to_string(),
      last_modified: None,
    }
  }

  pub fn with_last_modified(mut self, timestamp: u64) -> Self {
    self.last_modified = Some(timestamp);
    self
  }

  /// Equal apart from the timestamp.
  fn same_pin(&self, other: &Self) -> bool {
    self.version == other.version
      && self.type_ == other.type_
      && self.url == other.url
      && self.branch == other.branch
      && self.rev == other.rev
  }
}
