//! Git mirrors and tree export.
//!
//! Every git remote gets a clone under `<cache>/git/<name>-<url hash>` that is
//! fetched incrementally. Source trees handed to the build are not that clone: the
//! requested commit's tree is exported from the object database into its own
//! directory, so two packages (or two revisions of one package) never share
//! a working copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use gix::objs::tree::EntryKind;
use gix::remote::Direction;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{FETCH_ATTEMPTS, FETCH_BACKOFF_BASE_MS};
use crate::platform::paths::home_dir;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to create cache directory '{0}': {1}")]
  CreateCacheDir(PathBuf, #[source] std::io::Error),

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("failed to open repository at '{path}': {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to fetch from '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("failed to connect to remote '{url}': {source}")]
  Connect {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("no remote configured for repository")]
  NoRemote,

  #[error("revision '{rev}' not found in repository")]
  RevisionNotFound { rev: String },

  #[error("failed to export revision '{rev}': {source}")]
  Export {
    rev: String,
    #[source]
    source: BoxError,
  },

  #[error("path does not exist: {0}")]
  PathNotFound(PathBuf),

  #[error("failed to resolve path '{path}': {source}")]
  CanonicalizePath {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl FetchError {
  /// Whether retrying could plausibly succeed.
  ///
  /// Network operations are transient; a missing revision or path is not.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      FetchError::Clone { .. } | FetchError::Fetch { .. } | FetchError::Connect { .. }
    )
  }
}

/// Ask every in-flight clone and fetch to stop at its next checkpoint.
///
/// Process-wide and not reversible; meant for Ctrl-C handlers.
pub fn interrupt() {
  gix::interrupt::IS_INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Bounded exponential backoff for network operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: FETCH_ATTEMPTS,
      base_delay: Duration::from_millis(FETCH_BACKOFF_BASE_MS),
    }
  }
}

impl RetryPolicy {
  /// Run `op`, retrying transient failures with doubling delays.
  ///
  /// Stops retrying once [`interrupt`] has been called.
  pub fn run<T>(&self, what: &str, op: impl FnMut() -> Result<T, FetchError>) -> Result<T, FetchError> {
    self.run_until(what, &gix::interrupt::IS_INTERRUPTED, op)
  }

  fn run_until<T>(
    &self,
    what: &str,
    interrupted: &AtomicBool,
    mut op: impl FnMut() -> Result<T, FetchError>,
  ) -> Result<T, FetchError> {
    let attempts = self.attempts.max(1);
    let mut attempt = 1;
    loop {
      match op() {
        Ok(value) => return Ok(value),
        Err(err) if interrupted.load(Ordering::SeqCst) => {
          debug!(what, error = %err, "fetch interrupted, not retrying");
          return Err(err);
        }
        Err(err) if err.is_transient() && attempt < attempts => {
          let delay = self.base_delay * 2u32.pow(attempt - 1);
          warn!(what, attempt, error = %err, delay_ms = delay.as_millis() as u64, "transient fetch failure, retrying");
          thread::sleep(delay);
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

/// Open the cached clone at `repo_path`, cloning `url` if there is none.
///
/// Returns the repository and whether it was freshly cloned.
pub fn open_or_clone(url: &str, repo_path: &Path) -> Result<(gix::Repository, bool), FetchError> {
  if let Some(parent) = repo_path.parent()
    && !parent.exists()
  {
    fs::create_dir_all(parent).map_err(|e| FetchError::CreateCacheDir(parent.to_path_buf(), e))?;
  }

  if repo_path.join(".git").exists() {
    debug!(path = %repo_path.display(), "opening cached repository");
    let repo = gix::open(repo_path).map_err(|e| FetchError::Open {
      path: repo_path.to_path_buf(),
      source: Box::new(e),
    })?;
    return Ok((repo, false));
  }

  // A half-finished clone from an interrupted run.
  if repo_path.exists() {
    fs::remove_dir_all(repo_path).map_err(|e| FetchError::CreateCacheDir(repo_path.to_path_buf(), e))?;
  }

  info!(url, path = %repo_path.display(), "cloning repository");
  let repo = clone_repo(url, repo_path).inspect_err(|_| {
    let _ = fs::remove_dir_all(repo_path);
  })?;
  Ok((repo, true))
}

fn clone_repo(url: &str, dest: &Path) -> Result<gix::Repository, FetchError> {
  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| FetchError::Clone {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Clone {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(repo)
}

/// Fetch new objects and refs from the default remote.
pub fn fetch_updates(repo: &gix::Repository, url: &str) -> Result<(), FetchError> {
  debug!(url, "fetching updates");

  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or(FetchError::NoRemote)?
    .map_err(|e| FetchError::Connect {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  let connection = remote.connect(Direction::Fetch).map_err(|e| FetchError::Connect {
    url: url.to_string(),
    source: Box::new(e),
  })?;

  connection
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| FetchError::Fetch {
      url: url.to_string(),
      source: Box::new(e),
    })?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| FetchError::Fetch {
      url: url.to_string(),
      source: Box::new(e),
    })?;

  Ok(())
}

/// Resolve a revision spec (commit, tag or ref) to a full commit hash.
pub fn resolve_commit(repo: &gix::Repository, rev: &str) -> Result<String, FetchError> {
  let not_found = || FetchError::RevisionNotFound { rev: rev.to_string() };

  let id = repo.rev_parse_single(rev).map_err(|_| not_found())?;
  let commit = id
    .object()
    .map_err(|_| not_found())?
    .peel_to_commit()
    .map_err(|_| not_found())?;

  Ok(commit.id.to_string())
}

/// Resolve the head of a remote branch after a fetch.
pub fn resolve_branch(repo: &gix::Repository, branch: &str) -> Result<String, FetchError> {
  let candidates = [
    format!("refs/remotes/origin/{branch}"),
    format!("refs/heads/{branch}"),
  ];

  candidates
    .iter()
    .find_map(|spec| resolve_commit(repo, spec).ok())
    .ok_or_else(|| FetchError::RevisionNotFound {
      rev: format!("branch '{branch}'"),
    })
}

/// Write the tree of `commit` into `dest`, which must be an empty directory.
pub fn export_commit(repo: &gix::Repository, commit: &str, dest: &Path) -> Result<(), FetchError> {
  let export_error = |source: BoxError| FetchError::Export {
    rev: commit.to_string(),
    source,
  };

  let id = gix::ObjectId::from_hex(commit.as_bytes()).map_err(|e| export_error(Box::new(e)))?;
  let tree = repo
    .find_object(id)
    .map_err(|e| export_error(Box::new(e)))?
    .peel_to_tree()
    .map_err(|e| export_error(Box::new(e)))?;

  let mut recorder = gix::traverse::tree::Recorder::default();
  tree
    .traverse()
    .breadthfirst(&mut recorder)
    .map_err(|e| export_error(Box::new(e)))?;

  let mut files = 0usize;
  for entry in recorder.records {
    let rel_path = gix::path::from_byte_slice(&entry.filepath);
    let target = dest.join(rel_path);

    match entry.mode.kind() {
      EntryKind::Tree => {
        fs::create_dir_all(&target).map_err(|e| export_error(Box::new(e)))?;
      }
      EntryKind::Blob | EntryKind::BlobExecutable => {
        let blob = repo.find_object(entry.oid).map_err(|e| export_error(Box::new(e)))?;
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent).map_err(|e| export_error(Box::new(e)))?;
        }
        fs::write(&target, &blob.data).map_err(|e| export_error(Box::new(e)))?;
        #[cfg(unix)]
        if entry.mode.kind() == EntryKind::BlobExecutable {
          use std::os::unix::fs::PermissionsExt;
          fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).map_err(|e| export_error(Box::new(e)))?;
        }
        files += 1;
      }
      EntryKind::Link => {
        let blob = repo.find_object(entry.oid).map_err(|e| export_error(Box::new(e)))?;
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent).map_err(|e| export_error(Box::new(e)))?;
        }
        write_link(&blob.data, &target).map_err(|e| export_error(Box::new(e)))?;
        files += 1;
      }
      EntryKind::Commit => {
        warn!(path = %rel_path.display(), "skipping submodule");
      }
    }
  }

  debug!(rev = commit, files, dest = %dest.display(), "exported tree");
  Ok(())
}

#[cfg(unix)]
fn write_link(target_bytes: &[u8], link: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(gix::path::from_byte_slice(target_bytes), link)
}

// Symlinks need privileges on Windows; store the target path as file content.
#[cfg(windows)]
fn write_link(target_bytes: &[u8], link: &Path) -> std::io::Result<()> {
  fs::write(link, target_bytes)
}

/// Resolve a path source.
///
/// Handles `~` expansion and relative paths (against `base_dir`), and checks
/// that the path exists.
pub fn resolve_path(path: &Path, base_dir: Option<&Path>) -> Result<PathBuf, FetchError> {
  let expanded = if let Ok(rest) = path.strip_prefix("~") {
    home_dir().join(rest)
  } else if path.is_absolute() {
    path.to_path_buf()
  } else {
    match base_dir {
      Some(dir) => dir.join(path),
      None => path.to_path_buf(),
    }
  };

  let canonical = dunce::canonicalize(&expanded).map_err(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      FetchError::PathNotFound(expanded.clone())
    } else {
      FetchError::CanonicalizePath {
        path: expanded.clone(),
        source: e,
      }
    }
  })?;

  debug!(path = %canonical.display(), "resolved path source");
  Ok(canonical)
}
