//! Source acquisition.
//!
//! Materializes each package's source tree on disk:
//!
//! - **Fixed** git revisions are exported from a cached clone into
//!   `<cache>/src/<name>-<rev>` once and reused afterwards.
//! - **Floating** branches are fetched every time, refused unless the recipe
//!   opts in, and always reported. Movement since the lock file was written
//!   is reported as drift.
//! - **Path** sources are used in place.
//!
//! Completed trees carry a marker holding their content hash, so a second
//! acquisition of the same revision is a no-op that can prove it yields the
//! same content. Writers of a cache path hold a [`PathLock`] on it.

pub mod fetch;
pub mod lock;
pub mod path_lock;
pub mod types;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use fetch::{FetchError, RetryPolicy};
pub use lock::{LockError, LockFile, LockedPackage};
pub use path_lock::{PathLock, PathLockError};
pub use types::*;

use crate::consts::{SHORT_REV_LEN, SOURCE_COMPLETE_MARKER};
use crate::platform::paths::cache_dir;
use crate::resolve::ResolvedGraph;
use crate::util::hash::{HashError, hash_bytes, hash_directory};

/// Entries left out of source content hashes.
const HASH_EXCLUSIONS: &[&str] = &[SOURCE_COMPLETE_MARKER, ".git"];

/// Revision recorded for path sources.
pub const LOCAL_REV: &str = "local";

#[derive(Debug, Error)]
pub enum SourceError {
  #[error(
    "'{package}' tracks branch '{branch}' of {url}, which is not reproducible; set allow_floating = true or pin a rev"
  )]
  FloatingNotAllowed {
    package: String,
    url: String,
    branch: String,
  },

  #[error("revision '{rev}' of '{package}' not found")]
  RevisionNotFound { package: String, rev: String },

  #[error("failed to fetch '{package}': {source}")]
  Fetch {
    package: String,
    #[source]
    source: FetchError,
  },

  #[error("source of '{package}' does not exist: {}", .path.display())]
  PathNotFound { package: String, path: PathBuf },

  #[error(transparent)]
  Lock(#[from] PathLockError),

  #[error("failed to prepare '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to hash source tree: {0}")]
  Hash(#[from] HashError),
}

impl SourceError {
  fn from_fetch(package: &str, err: FetchError) -> Self {
    match err {
      FetchError::RevisionNotFound { rev } => SourceError::RevisionNotFound {
        package: package.to_string(),
        rev,
      },
      FetchError::PathNotFound(path) => SourceError::PathNotFound {
        package: package.to_string(),
        path,
      },
      other => SourceError::Fetch {
        package: package.to_string(),
        source: other,
      },
    }
  }
}

/// Contents of the completion marker in an exported tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMarker {
  pub version: u32,
  pub rev: String,
  pub content_hash: String,
}

/// Materializes source trees under a cache root.
#[derive(Debug, Clone)]
pub struct Acquirer {
  git_dir: PathBuf,
  src_dir: PathBuf,
  retry: RetryPolicy,
}

impl Acquirer {
  /// Cache under `root/git` and `root/src`.
  pub fn new(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    Self {
      git_dir: root.join("git"),
      src_dir: root.join("src"),
      retry: RetryPolicy::default(),
    }
  }

  /// Cache at the platform default location (or `PAKT_CACHE_DIR`).
  pub fn from_env() -> Self {
    Self::new(cache_dir())
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Materialize one source.
  ///
  /// `base_dir` anchors relative path sources. `locked` is the package's
  /// previous lock entry, used to detect floating drift.
  pub fn acquire(
    &self,
    package: &str,
    source: &SourceRef,
    base_dir: Option<&Path>,
    locked: Option<&LockedPackage>,
  ) -> Result<AcquiredSource, SourceError> {
    match source {
      SourceRef::Path { path } => self.acquire_path(package, path, base_dir),
      SourceRef::Fixed { url, rev } => self.acquire_fixed(package, url, rev),
      SourceRef::Floating { url, branch, allowed } => {
        if !allowed {
          return Err(SourceError::FloatingNotAllowed {
            package: package.to_string(),
            url: url.clone(),
            branch: branch.clone(),
          });
        }
        self.acquire_floating(package, url, branch, locked)
      }
    }
  }

  /// Materialize every package in the graph that has a source, concurrently.
  ///
  /// Results are keyed by package name; on failure the error of the first
  /// failing package (by name) is returned.
  pub fn acquire_all(
    &self,
    graph: &ResolvedGraph,
    base_dir: Option<&Path>,
    lock: &LockFile,
  ) -> Result<BTreeMap<String, AcquiredSource>, SourceError> {
    let jobs: Vec<(&str, &SourceRef)> = graph
      .nodes
      .values()
      .filter_map(|node| node.source.as_ref().map(|source| (node.name.as_str(), source)))
      .collect();

    info!(count = jobs.len(), "acquiring sources");

    let results: Vec<(String, Result<AcquiredSource, SourceError>)> = jobs
      .par_iter()
      .map(|(name, source)| {
        let result = self.acquire(name, source, base_dir, lock.get(name));
        (name.to_string(), result)
      })
      .collect();

    let mut acquired = BTreeMap::new();
    for (name, result) in results {
      acquired.insert(name, result?);
    }
    Ok(acquired)
  }

  fn acquire_path(&self, package: &str, path: &Path, base_dir: Option<&Path>) -> Result<AcquiredSource, SourceError> {
    let resolved = fetch::resolve_path(path, base_dir).map_err(|e| SourceError::from_fetch(package, e))?;
    let content_hash = hash_directory(&resolved, HASH_EXCLUSIONS)?;
    debug!(package, path = %resolved.display(), "using path source");

    Ok(AcquiredSource {
      path: resolved,
      rev: LOCAL_REV.to_string(),
      content_hash: content_hash.0,
      warnings: Vec::new(),
    })
  }

  fn acquire_fixed(&self, package: &str, url: &str, rev: &str) -> Result<AcquiredSource, SourceError> {
    let repo_path = self.mirror_path(package, url);
    let _mirror_lock = PathLock::acquire(&repo_path)?;

    let (repo, commit) = self
      .retry
      .run(package, || {
        let (repo, cloned) = fetch::open_or_clone(url, &repo_path)?;
        match fetch::resolve_commit(&repo, rev) {
          Ok(commit) => Ok((repo, commit)),
          Err(FetchError::RevisionNotFound { .. }) if !cloned => {
            // Known revisions need no network; unknown ones may be new upstream.
            fetch::fetch_updates(&repo, url)?;
            let commit = fetch::resolve_commit(&repo, rev)?;
            Ok((repo, commit))
          }
          Err(e) => Err(e),
        }
      })
      .map_err(|e| SourceError::from_fetch(package, e))?;

    let (path, content_hash) = self.materialize(package, &repo, &commit)?;
    Ok(AcquiredSource {
      path,
      rev: commit,
      content_hash,
      warnings: Vec::new(),
    })
  }

  fn acquire_floating(
    &self,
    package: &str,
    url: &str,
    branch: &str,
    locked: Option<&LockedPackage>,
  ) -> Result<AcquiredSource, SourceError> {
    let repo_path = self.mirror_path(package, url);
    let _mirror_lock = PathLock::acquire(&repo_path)?;

    let (repo, commit) = self
      .retry
      .run(package, || {
        let (repo, cloned) = fetch::open_or_clone(url, &repo_path)?;
        if !cloned {
          fetch::fetch_updates(&repo, url)?;
        }
        let commit = fetch::resolve_branch(&repo, branch)?;
        Ok((repo, commit))
      })
      .map_err(|e| SourceError::from_fetch(package, e))?;

    let mut warnings = vec![SourceWarning::FloatingReference {
      package: package.to_string(),
      branch: branch.to_string(),
      rev: commit.clone(),
    }];
    warn!(package, branch, rev = %commit, "using floating branch reference; build is not reproducible");

    if let Some(drift) = check_floating_drift(package, url, branch, locked, &commit) {
      warn!(package, branch, "{drift}");
      warnings.push(drift);
    }

    let (path, content_hash) = self.materialize(package, &repo, &commit)?;
    Ok(AcquiredSource {
      path,
      rev: commit,
      content_hash,
      warnings,
    })
  }

  /// Clone location for `url`: `<cache>/git/<name>-<url hash>`.
  ///
  /// The URL is part of the key, so a recipe that moves to another remote
  /// gets a fresh clone instead of reusing the old remote's objects.
  fn mirror_path(&self, package: &str, url: &str) -> PathBuf {
    let url_hash = hash_bytes(url.as_bytes());
    self
      .git_dir
      .join(format!("{package}-{}", url_hash.short(SHORT_REV_LEN)))
  }

  /// Export `commit` into its cache directory unless a complete copy exists.
  fn materialize(&self, package: &str, repo: &gix::Repository, commit: &str) -> Result<(PathBuf, String), SourceError> {
    let short = &commit[..SHORT_REV_LEN.min(commit.len())];
    let dest = self.src_dir.join(format!("{package}-{short}"));
    let _dest_lock = PathLock::acquire(&dest)?;

    if let Some(marker) = read_marker(&dest)
      && marker.rev == commit
    {
      let current = hash_directory(&dest, HASH_EXCLUSIONS)?;
      if current.0 == marker.content_hash {
        debug!(package, path = %dest.display(), "source already materialized");
        return Ok((dest, marker.content_hash));
      }
      warn!(package, path = %dest.display(), "source tree modified since export, exporting again");
    }

    let io_error = |path: &Path| {
      let path = path.to_path_buf();
      move |source| SourceError::Io { path, source }
    };

    if dest.exists() {
      fs::remove_dir_all(&dest).map_err(io_error(&dest))?;
    }
    fs::create_dir_all(&self.src_dir).map_err(io_error(&self.src_dir))?;

    let staging = tempfile::Builder::new()
      .prefix(&format!(".{package}-"))
      .tempdir_in(&self.src_dir)
      .map_err(io_error(&self.src_dir))?;

    fetch::export_commit(repo, commit, staging.path()).map_err(|e| SourceError::from_fetch(package, e))?;

    let content_hash = hash_directory(staging.path(), HASH_EXCLUSIONS)?;
    let marker = SourceMarker {
      version: 1,
      rev: commit.to_string(),
      content_hash: content_hash.0.clone(),
    };
    let marker_json = serde_json::to_string(&marker).map_err(|e| SourceError::Io {
      path: dest.clone(),
      source: std::io::Error::other(e),
    })?;
    fs::write(staging.path().join(SOURCE_COMPLETE_MARKER), format!("{marker_json}\n"))
      .map_err(io_error(staging.path()))?;

    let staged = staging.keep();
    fs::rename(&staged, &dest).map_err(io_error(&dest))?;

    info!(package, rev = %short, path = %dest.display(), "source materialized");
    Ok((dest, content_hash.0))
  }
}

fn read_marker(dir: &Path) -> Option<SourceMarker> {
  let content = fs::read_to_string(dir.join(SOURCE_COMPLETE_MARKER)).ok()?;
  serde_json::from_str(&content).ok()
}

/// Compare a floating branch's current head against the locked revision.
///
/// Only a lock entry for the same remote and branch can drift; anything else
/// is a new pin.
pub fn check_floating_drift(
  package: &str,
  url: &str,
  branch: &str,
  locked: Option<&LockedPackage>,
  current_rev: &str,
) -> Option<SourceWarning> {
  let locked = locked?;
  if locked.url.as_deref() != Some(url) || locked.branch.as_deref() != Some(branch) || locked.rev == current_rev {
    return None;
  }
  Some(SourceWarning::FloatingDrift {
    package: package.to_string(),
    branch: branch.to_string(),
    previous_rev: locked.rev.clone(),
    current_rev: current_rev.to_string(),
  })
}

/// Record resolved versions and acquired revisions, returning whether the lock changed.
pub fn update_lock(lock: &mut LockFile, graph: &ResolvedGraph, acquired: &BTreeMap<String, AcquiredSource>) -> bool {
  let now = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0);

  let mut changed = false;
  for node in graph.nodes.values() {
    let (Some(source), Some(result)) = (&node.source, acquired.get(&node.name)) else {
      continue;
    };
    let entry = LockedPackage::new(node.version.as_str(), source, &result.rev).with_last_modified(now);
    changed |= lock.record(&node.name, entry);
  }

  let names = graph.nodes.keys().cloned().collect();
  changed |= lock.retain_packages(&names);
  changed
}
