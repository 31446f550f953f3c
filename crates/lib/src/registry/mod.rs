//! Recipe registries.
//!
//! The resolver only needs two questions answered: which versions of a
//! package exist, and what the recipe for one of them says. [`FsRegistry`]
//! answers them from a directory tree laid out as
//! `<root>/<name>/<version>.toml`; [`MemoryRegistry`] holds recipes in memory.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::recipe::{PackageVersion, Recipe, RecipeError, VersionError};

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("failed to read registry directory '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("registry entry '{path}' is not named after a version: {source}")]
  BadFileName {
    path: PathBuf,
    #[source]
    source: VersionError,
  },

  #[error("registry entry '{path}' declares {found}, expected {expected}")]
  Mismatch {
    path: PathBuf,
    expected: String,
    found: String,
  },

  #[error("'{name}@{version}' is not in the registry")]
  NotFound { name: String, version: String },

  #[error(transparent)]
  Recipe(#[from] RecipeError),
}

/// Source of package recipes.
pub trait Registry: Send + Sync {
  /// All known versions of `name`, ascending, or `None` if the package is unknown.
  fn versions(&self, name: &str) -> Result<Option<Vec<PackageVersion>>, RegistryError>;

  /// The recipe for one version of a package.
  fn recipe(&self, name: &str, version: &PackageVersion) -> Result<Recipe, RegistryError>;
}

/// Registry backed by a directory of recipe files.
#[derive(Debug, Clone)]
pub struct FsRegistry {
  root: PathBuf,
}

impl FsRegistry {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entries(&self, name: &str) -> Result<Option<Vec<(PackageVersion, PathBuf)>>, RegistryError> {
    let dir = self.root.join(name);
    let read = match fs::read_dir(&dir) {
      Ok(read) => read,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(RegistryError::Io { path: dir, source }),
    };

    let mut entries = Vec::new();
    for entry in read {
      let entry = entry.map_err(|source| RegistryError::Io {
        path: dir.clone(),
        source,
      })?;
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("toml") {
        trace!(path = %path.display(), "skipping non-recipe file");
        continue;
      }
      let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        continue;
      };
      let version = PackageVersion::parse(stem).map_err(|source| RegistryError::BadFileName {
        path: path.clone(),
        source,
      })?;
      entries.push((version, path));
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(Some(entries))
  }
}

impl Registry for FsRegistry {
  fn versions(&self, name: &str) -> Result<Option<Vec<PackageVersion>>, RegistryError> {
    let versions = self
      .entries(name)?
      .map(|entries| entries.into_iter().map(|(version, _)| version).collect());
    Ok(versions)
  }

  fn recipe(&self, name: &str, version: &PackageVersion) -> Result<Recipe, RegistryError> {
    let not_found = || RegistryError::NotFound {
      name: name.to_string(),
      version: version.to_string(),
    };

    let path = self
      .entries(name)?
      .ok_or_else(not_found)?
      .into_iter()
      .find(|(v, _)| v == version)
      .map(|(_, path)| path)
      .ok_or_else(not_found)?;

    debug!(name, %version, path = %path.display(), "loading registry recipe");
    let recipe = Recipe::load(&path)?;

    if recipe.name != name || recipe.version != *version {
      return Err(RegistryError::Mismatch {
        path,
        expected: format!("{name}@{version}"),
        found: recipe.id(),
      });
    }

    Ok(recipe)
  }
}

/// Registry holding recipes in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
  packages: BTreeMap<String, BTreeMap<PackageVersion, Recipe>>,
}

impl MemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, recipe: Recipe) {
    self
      .packages
      .entry(recipe.name.clone())
      .or_default()
      .insert(recipe.version.clone(), recipe);
  }

  /// Parse and add a recipe written as TOML.
  pub fn insert_toml(&mut self, content: &str) -> Result<(), RecipeError> {
    self.insert(Recipe::parse(content)?);
    Ok(())
  }

  pub fn with(mut self, recipe: Recipe) -> Self {
    self.insert(recipe);
    self
  }
}

impl Registry for MemoryRegistry {
  fn versions(&self, name: &str) -> Result<Option<Vec<PackageVersion>>, RegistryError> {
    Ok(self.packages.get(name).map(|versions| versions.keys().cloned().collect()))
  }

  fn recipe(&self, name: &str, version: &PackageVersion) -> Result<Recipe, RegistryError> {
    self
      .packages
      .get(name)
      .and_then(|versions| versions.get(version))
      .cloned()
      .ok_or_else(|| RegistryError::NotFound {
        name: name.to_string(),
        version: version.to_string(),
      })
  }
}
