//! Packager: validates install prefixes and publishes the artifact set.
//!
//! The artifact set is what downstream build systems consume: libraries in
//! the order a linker needs them, include roots, library directories and
//! preprocessor defines.
//!
//! # Link order
//!
//! With the default `derived` policy, packages are walked dependents first
//! (if A depends on B, every library of A precedes every library of B) and
//! each package contributes its `libs` in the order it declares them. The
//! `explicit` policy publishes `[link].libs` verbatim after checking that
//! every entry is actually produced; an explicit order that contradicts the
//! graph is published anyway, with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::OutputLayout;
use crate::recipe::{LinkDecl, LinkOrderPolicy};
use crate::resolve::{ResolvedGraph, ResolvedNode};
use crate::settings::{BuildMode, BuildSettings};
use crate::util::fs::write_atomic;

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("'{package}' built successfully but did not install library '{lib}' (looked for {})", display_paths(.searched))]
  MissingArtifact {
    package: String,
    lib: String,
    searched: Vec<PathBuf>,
  },

  #[error("no libraries to publish")]
  EmptyArtifactSet,

  #[error("explicit link order names '{0}', which no package produces")]
  UnknownLinkLibrary(String),

  #[error("failed to write artifact metadata '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read artifact metadata '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid artifact metadata: {0}")]
  Json(#[from] serde_json::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| p.display().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

/// One package's contribution to the artifact set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedEntry {
  pub name: String,
  pub version: String,
  pub prefix: PathBuf,
  pub libs: Vec<String>,
}

/// Published output of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub package: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  pub build_mode: BuildMode,
  /// Libraries in link order.
  pub libs: Vec<String>,
  pub include_dirs: Vec<PathBuf>,
  pub lib_dirs: Vec<PathBuf>,
  pub defines: Vec<String>,
  /// Contributing packages, in link order.
  pub packages: Vec<PackagedEntry>,
}

impl ArtifactSet {
  /// Write as pretty JSON, replacing any existing file atomically.
  pub fn write(&self, path: &Path) -> Result<(), PackageError> {
    let mut json = serde_json::to_string_pretty(self)?;
    json.push('\n');
    write_atomic(path, json.as_bytes()).map_err(|source| PackageError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    info!(path = %path.display(), libs = self.libs.len(), "artifact set written");
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self, PackageError> {
    let content = fs::read_to_string(path).map_err(|source| PackageError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(serde_json::from_str(&content)?)
  }
}

/// Library names in derived link order.
pub fn derived_link_order(graph: &ResolvedGraph) -> Vec<String> {
  graph
    .link_order()
    .into_iter()
    .flat_map(|node| node.libs.iter().cloned())
    .collect()
}

/// Assemble and validate the artifact set from installed prefixes.
pub fn collect(
  graph: &ResolvedGraph,
  settings: &BuildSettings,
  layout: &OutputLayout,
  link: &LinkDecl,
) -> Result<ArtifactSet, PackageError> {
  let order = graph.link_order();

  let mut packages = Vec::new();
  let mut include_dirs = Vec::new();
  let mut lib_dirs = Vec::new();
  let mut defines: Vec<String> = Vec::new();

  for node in &order {
    verify_libraries(node, settings, layout)?;

    let include_dir = layout.include_dir(&node.name);
    if include_dir.is_dir() {
      include_dirs.push(include_dir);
    }
    if !node.libs.is_empty() {
      lib_dirs.push(layout.lib_dir(&node.name));
    }
    for define in &node.defines {
      if !defines.contains(define) {
        defines.push(define.clone());
      }
    }

    packages.push(PackagedEntry {
      name: node.name.clone(),
      version: node.version.to_string(),
      prefix: layout.prefix(&node.name),
      libs: node.libs.clone(),
    });
  }

  let derived = derived_link_order(graph);
  let libs = match link.order {
    LinkOrderPolicy::Derived => derived,
    LinkOrderPolicy::Explicit => explicit_link_order(&link.libs, &derived)?,
  };

  if libs.is_empty() {
    return Err(PackageError::EmptyArtifactSet);
  }

  let root = graph.root_node();
  Ok(ArtifactSet {
    package: root.map(|n| n.name.clone()),
    version: root.map(|n| n.version.to_string()),
    build_mode: settings.build_mode,
    libs,
    include_dirs,
    lib_dirs,
    defines,
    packages,
  })
}

fn verify_libraries(node: &ResolvedNode, settings: &BuildSettings, layout: &OutputLayout) -> Result<(), PackageError> {
  let lib_dir = layout.lib_dir(&node.name);
  for lib in &node.libs {
    let candidates: Vec<PathBuf> = settings
      .os
      .library_file_names(lib, node.is_shared())
      .into_iter()
      .map(|file| lib_dir.join(file))
      .collect();

    match candidates.iter().find(|path| path.is_file()) {
      Some(found) => debug!(package = %node.name, lib, path = %found.display(), "found library"),
      None => {
        return Err(PackageError::MissingArtifact {
          package: node.id(),
          lib: lib.clone(),
          searched: candidates,
        });
      }
    }
  }
  Ok(())
}

fn explicit_link_order(explicit: &[String], derived: &[String]) -> Result<Vec<String>, PackageError> {
  let position: BTreeMap<&str, usize> = derived.iter().enumerate().map(|(i, lib)| (lib.as_str(), i)).collect();

  for lib in explicit {
    if !position.contains_key(lib.as_str()) {
      return Err(PackageError::UnknownLinkLibrary(lib.clone()));
    }
  }

  for pair in explicit.windows(2) {
    if position[pair[0].as_str()] > position[pair[1].as_str()] {
      warn!(
        first = %pair[0],
        second = %pair[1],
        "explicit link order places '{}' before '{}', but the dependency graph requires the opposite",
        pair[0],
        pair[1]
      );
    }
  }

  let listed: BTreeSet<&str> = explicit.iter().map(String::as_str).collect();
  let omitted: Vec<&str> = derived
    .iter()
    .map(String::as_str)
    .filter(|lib| !listed.contains(lib))
    .collect();
  if !omitted.is_empty() {
    warn!(omitted = ?omitted, "explicit link order omits produced libraries");
  }

  Ok(explicit.to_vec())
}
