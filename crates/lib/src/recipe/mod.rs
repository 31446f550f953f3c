//! Recipe loading.
//!
//! A recipe is a TOML file naming one package, where its source lives, which
//! packages it requires and how it wants them configured. The root recipe and
//! every registry entry share the same format; see [`RecipeFile`] for the raw
//! layout and [`Recipe`] for the validated form the pipeline consumes.

pub mod types;
pub mod version;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use types::*;
pub use version::{Constraint, PackageVersion, VersionError};

use crate::platform::paths::home_dir;
use crate::settings::SettingsDecl;
use crate::source::SourceRef;

#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read recipe '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse recipe '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("package '{package}' requires '{dependency}': {source}")]
  InvalidConstraint {
    package: String,
    dependency: String,
    #[source]
    source: VersionError,
  },

  #[error("package '{package}' has an invalid [source]: {reason}")]
  InvalidSource { package: String, reason: String },

  #[error("package '{0}' requires itself")]
  SelfDependency(String),

  #[error("package '{package}' uses explicit link order but [link].libs is empty")]
  EmptyExplicitLinkOrder { package: String },
}

/// A validated recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
  pub name: String,
  pub version: PackageVersion,
  pub libs: Vec<String>,
  pub defines: Vec<String>,
  pub source: Option<SourceRef>,
  pub settings: SettingsDecl,
  /// Direct requirements, ordered by name, each carrying `[options.<name>]`.
  pub requires: Vec<DependencySpec>,
  /// Defaults for this package's own options.
  pub default_options: Options,
  /// `[options."*"]`.
  pub global_options: Options,
  /// Every `[options.<name>]` table, including names not in `[requires]`.
  pub dependency_options: BTreeMap<String, Options>,
  pub supports: Supports,
  pub link: LinkDecl,
  pub backend: BackendDecl,
  /// Directory the recipe was loaded from; relative paths resolve against it.
  pub dir: Option<PathBuf>,
}

impl Recipe {
  /// Load and validate a recipe file.
  pub fn load(path: &Path) -> Result<Self, RecipeError> {
    let content = fs::read_to_string(path).map_err(|source| RecipeError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let dir = path.parent().map(|p| {
      if p.as_os_str().is_empty() {
        PathBuf::from(".")
      } else {
        p.to_path_buf()
      }
    });

    let recipe = Self::parse_with_dir(&content, path, dir)?;
    debug!(path = %path.display(), name = %recipe.name, version = %recipe.version, "loaded recipe");
    Ok(recipe)
  }

  /// Parse recipe text that did not come from a file.
  pub fn parse(content: &str) -> Result<Self, RecipeError> {
    Self::parse_with_dir(content, Path::new("<memory>"), None)
  }

  fn parse_with_dir(content: &str, origin: &Path, dir: Option<PathBuf>) -> Result<Self, RecipeError> {
    let file: RecipeFile = toml::from_str(content).map_err(|e| RecipeError::Parse {
      path: origin.to_path_buf(),
      source: Box::new(e),
    })?;
    Self::from_file(file, dir)
  }

  /// Validate a deserialized recipe.
  pub fn from_file(file: RecipeFile, dir: Option<PathBuf>) -> Result<Self, RecipeError> {
    let RecipeFile {
      package,
      source,
      settings,
      requires,
      default_options,
      mut options,
      supports,
      link,
      backend,
    } = file;

    let name = package.name;

    let mut specs = Vec::with_capacity(requires.len());
    for (dep_name, raw) in requires {
      if dep_name == name {
        return Err(RecipeError::SelfDependency(name));
      }
      let constraint = Constraint::parse(&raw).map_err(|source| RecipeError::InvalidConstraint {
        package: name.clone(),
        dependency: dep_name.clone(),
        source,
      })?;
      let dep_options = options.get(&dep_name).cloned().unwrap_or_default();
      specs.push(DependencySpec {
        name: dep_name,
        constraint,
        options: dep_options,
      });
    }

    let global_options = options.remove(ALL_PACKAGES).unwrap_or_default();

    let source = match source {
      Some(decl) => Some(source_ref(&name, decl, dir.as_deref())?),
      None => None,
    };

    if link.order == LinkOrderPolicy::Explicit && link.libs.is_empty() {
      return Err(RecipeError::EmptyExplicitLinkOrder { package: name });
    }

    Ok(Self {
      name,
      version: package.version,
      libs: package.libs,
      defines: package.defines,
      source,
      settings,
      requires: specs,
      default_options,
      global_options,
      dependency_options: options,
      supports,
      link,
      backend,
      dir,
    })
  }

  /// `name@version`, as used in log and error messages.
  pub fn id(&self) -> String {
    format!("{}@{}", self.name, self.version)
  }
}

/// Turn a `[source]` table into a source reference.
fn source_ref(package: &str, decl: SourceDecl, dir: Option<&Path>) -> Result<SourceRef, RecipeError> {
  let invalid = |reason: &str| RecipeError::InvalidSource {
    package: package.to_string(),
    reason: reason.to_string(),
  };

  let SourceDecl {
    git,
    rev,
    tag,
    branch,
    path,
    allow_floating,
  } = decl;

  let pins = [rev.is_some(), tag.is_some(), branch.is_some()]
    .iter()
    .filter(|set| **set)
    .count();

  match (git, path) {
    (Some(_), Some(_)) => Err(invalid("'git' and 'path' are mutually exclusive")),
    (None, Some(path)) => {
      if pins > 0 {
        return Err(invalid("'rev', 'tag' and 'branch' only apply to git sources"));
      }
      Ok(SourceRef::Path {
        path: expand_path(&path, dir),
      })
    }
    (Some(url), None) => {
      if pins > 1 {
        return Err(invalid("only one of 'rev', 'tag' or 'branch' may be set"));
      }
      match (rev.or(tag), branch) {
        (Some(rev), _) => Ok(SourceRef::Fixed { url, rev }),
        (None, Some(branch)) => Ok(SourceRef::Floating {
          url,
          branch,
          allowed: allow_floating,
        }),
        (None, None) => Err(invalid("git sources need a 'rev', 'tag' or 'branch'")),
      }
    }
    (None, None) => Err(invalid("expected 'git' or 'path'")),
  }
}

/// Expand `~` and make relative paths absolute against the recipe directory.
pub fn expand_path(path: &Path, dir: Option<&Path>) -> PathBuf {
  if let Ok(rest) = path.strip_prefix("~") {
    return home_dir().join(rest);
  }
  if path.is_absolute() {
    return path.to_path_buf();
  }
  match dir {
    Some(dir) => dir.join(path),
    None => path.to_path_buf(),
  }
}
