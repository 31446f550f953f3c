//! Source reference and acquisition result types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a package's source code comes from.
///
/// Fixed revisions are reproducible. Floating references (branch names) can
/// resolve to different content over time, so they need explicit opt-in and
/// are always reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceRef {
  /// A commit hash or tag.
  Fixed { url: String, rev: String },

  /// A branch whose head is resolved at fetch time.
  Floating {
    url: String,
    branch: String,
    #[serde(default)]
    allowed: bool,
  },

  /// A local directory, used in place.
  Path { path: PathBuf },
}

impl SourceRef {
  /// Short type name, as recorded in the lock file.
  pub fn kind(&self) -> &'static str {
    match self {
      SourceRef::Fixed { .. } => "git",
      SourceRef::Floating { .. } => "branch",
      SourceRef::Path { .. } => "path",
    }
  }

  pub fn url(&self) -> Option<&str> {
    match self {
      SourceRef::Fixed { url, .. } | SourceRef::Floating { url, .. } => Some(url),
      SourceRef::Path { .. } => None,
    }
  }

  pub fn is_floating(&self) -> bool {
    matches!(self, SourceRef::Floating { .. })
  }
}

impl fmt::Display for SourceRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceRef::Fixed { url, rev } => write!(f, "{url}#{rev}"),
      SourceRef::Floating { url, branch, .. } => write!(f, "{url}@{branch} (floating)"),
      SourceRef::Path { path } => write!(f, "path:{}", path.display()),
    }
  }
}

/// A warning surfaced by the acquirer instead of a silent success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceWarning {
  /// A floating reference was used at all.
  FloatingReference { package: String, branch: String, rev: String },

  /// A floating reference now points at different content than last time.
  FloatingDrift {
    package: String,
    branch: String,
    previous_rev: String,
    current_rev: String,
  },
}

impl fmt::Display for SourceWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceWarning::FloatingReference { package, branch, rev } => write!(
        f,
        "'{package}' tracks branch '{branch}' (resolved to {rev}); builds are not reproducible"
      ),
      SourceWarning::FloatingDrift {
        package,
        branch,
        previous_rev,
        current_rev,
      } => write!(
        f,
        "'{package}' branch '{branch}' moved from {previous_rev} to {current_rev} since the last fetch"
      ),
    }
  }
}

/// A materialized source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredSource {
  /// Root of the source tree.
  pub path: PathBuf,
  /// Commit hash, or "local" for path sources.
  pub rev: String,
  /// Content hash of the materialized tree.
  pub content_hash: String,
  pub warnings: Vec<SourceWarning>,
}
