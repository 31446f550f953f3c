//! The build pipeline: resolve, fetch, configure, build, package.
//!
//! Each stage consumes only what the previous stages produced, and the first
//! failure ends the run. Errors carry the name of the stage that produced
//! them, with any backend output kept verbatim underneath.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::build::{BuildDriver, BuildError, BuiltPackage, CancelToken};
use crate::consts::LOCK_FILENAME;
use crate::layout::OutputLayout;
use crate::package::{self, ArtifactSet, PackageError};
use crate::recipe::Recipe;
use crate::registry::Registry;
use crate::resolve::{self, ResolveError, ResolvedGraph};
use crate::settings::{BuildMode, BuildSettings, SettingsError};
use crate::source::{self, AcquiredSource, Acquirer, LockError, LockFile, SourceError, SourceWarning};
use crate::toolchain::{self, ToolchainError, ToolchainFiles};
use crate::util::fs::remove_file_if_exists;

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
  Resolve,
  Fetch,
  Configure,
  Build,
  Package,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Resolve => "resolve",
      Stage::Fetch => "fetch",
      Stage::Configure => "configure",
      Stage::Build => "build",
      Stage::Package => "package",
    }
  }
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("resolve: {0}")]
  Resolve(#[from] ResolveError),

  #[error("fetch: {0}")]
  Fetch(#[from] SourceError),

  #[error("fetch: {0}")]
  Lock(#[from] LockError),

  #[error("fetch: source worker failed: {0}")]
  FetchWorker(#[from] tokio::task::JoinError),

  #[error("configure: {0}")]
  Configure(#[from] ToolchainError),

  #[error("build: {0}")]
  Build(#[from] BuildError),

  #[error("package: {0}")]
  Package(#[from] PackageError),

  #[error("package: failed to remove stale '{}': {source}", .path.display())]
  StaleArtifacts {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl PipelineError {
  pub fn stage(&self) -> Stage {
    match self {
      PipelineError::Resolve(_) => Stage::Resolve,
      PipelineError::Fetch(_) | PipelineError::Lock(_) | PipelineError::FetchWorker(_) => Stage::Fetch,
      PipelineError::Configure(_) => Stage::Configure,
      PipelineError::Build(_) => Stage::Build,
      PipelineError::Package(_) | PipelineError::StaleArtifacts { .. } => Stage::Package,
    }
  }
}

/// Sources acquired for a graph.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
  pub sources: BTreeMap<String, AcquiredSource>,
  pub warnings: Vec<SourceWarning>,
  /// Whether the lock file was rewritten.
  pub lock_updated: bool,
}

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
  pub graph: ResolvedGraph,
  pub built: Vec<BuiltPackage>,
  pub artifacts: ArtifactSet,
  pub warnings: Vec<SourceWarning>,
}

/// Settings for a recipe: host defaults, then `[settings]`, then `mode`.
pub fn settings_for(recipe: &Recipe, mode: Option<BuildMode>) -> Result<BuildSettings, SettingsError> {
  let settings = BuildSettings::host()?.with_decl(&recipe.settings);
  Ok(match mode {
    Some(mode) => settings.with_mode(mode),
    None => settings,
  })
}

pub struct Pipeline {
  recipe: Recipe,
  registry: Arc<dyn Registry>,
  settings: BuildSettings,
  layout: OutputLayout,
  acquirer: Acquirer,
  lock_path: Option<PathBuf>,
  cancel: CancelToken,
}

impl Pipeline {
  /// A pipeline using the default source cache and a lock file next to the recipe.
  pub fn new(recipe: Recipe, registry: Arc<dyn Registry>, settings: BuildSettings, layout: OutputLayout) -> Self {
    let lock_path = recipe.dir.as_ref().map(|dir| dir.join(LOCK_FILENAME));
    Self {
      recipe,
      registry,
      settings,
      layout,
      acquirer: Acquirer::from_env(),
      lock_path,
      cancel: CancelToken::never(),
    }
  }

  pub fn with_acquirer(mut self, acquirer: Acquirer) -> Self {
    self.acquirer = acquirer;
    self
  }

  /// Override where the lock file lives; `None` disables it.
  pub fn with_lock_path(mut self, lock_path: Option<PathBuf>) -> Self {
    self.lock_path = lock_path;
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn recipe(&self) -> &Recipe {
    &self.recipe
  }

  pub fn settings(&self) -> &BuildSettings {
    &self.settings
  }

  pub fn layout(&self) -> &OutputLayout {
    &self.layout
  }

  pub fn resolve(&self) -> Result<ResolvedGraph, PipelineError> {
    Ok(resolve::resolve_recipe(&self.recipe, self.registry.as_ref())?)
  }

  /// Acquire every source in the graph and update the lock file.
  pub async fn fetch(&self, graph: &ResolvedGraph) -> Result<FetchOutcome, PipelineError> {
    let mut lock = match &self.lock_path {
      Some(path) => LockFile::load(path)?.unwrap_or_default(),
      None => LockFile::new(),
    };

    let acquirer = self.acquirer.clone();
    let owned_graph = graph.clone();
    let base_dir = self.recipe.dir.clone();
    let previous = lock.clone();
    let sources = tokio::task::spawn_blocking(move || acquirer.acquire_all(&owned_graph, base_dir.as_deref(), &previous))
      .await??;

    let warnings: Vec<SourceWarning> = sources.values().flat_map(|s| s.warnings.iter().cloned()).collect();

    let lock_updated = source::update_lock(&mut lock, graph, &sources);
    if lock_updated && let Some(path) = &self.lock_path {
      lock.save(path)?;
      info!(path = %path.display(), "lock file updated");
    }

    Ok(FetchOutcome {
      sources,
      warnings,
      lock_updated,
    })
  }

  /// Check settings and write toolchain files for every package with a source.
  pub fn configure(
    &self,
    graph: &ResolvedGraph,
    sources: &BTreeMap<String, AcquiredSource>,
  ) -> Result<BTreeMap<String, ToolchainFiles>, PipelineError> {
    toolchain::check_compatible(graph, &self.settings)?;

    let mut files = BTreeMap::new();
    for name in sources.keys() {
      files.insert(
        name.clone(),
        toolchain::generate(graph, name, &self.settings, &self.layout)?,
      );
    }
    Ok(files)
  }

  pub async fn build(
    &self,
    graph: &ResolvedGraph,
    sources: &BTreeMap<String, AcquiredSource>,
  ) -> Result<Vec<BuiltPackage>, PipelineError> {
    let driver = BuildDriver::new(graph, &self.settings, &self.layout, sources).with_cancel(self.cancel.clone());
    Ok(driver.build_all().await?)
  }

  /// Collect, validate and publish the artifact set.
  pub fn package(&self, graph: &ResolvedGraph) -> Result<ArtifactSet, PipelineError> {
    let artifacts = package::collect(graph, &self.settings, &self.layout, &self.recipe.link)?;
    artifacts.write(&self.layout.artifacts_path())?;
    Ok(artifacts)
  }

  /// Run every stage.
  pub async fn run(&self) -> Result<PipelineOutcome, PipelineError> {
    info!(package = %self.recipe.id(), settings = %self.settings, "starting pipeline");
    self.remove_stale_artifacts()?;

    let graph = self.resolve()?;
    info!(packages = graph.len(), "dependencies resolved");

    let fetched = self.fetch(&graph).await?;
    for warning in &fetched.warnings {
      warn!("{warning}");
    }

    self.configure(&graph, &fetched.sources)?;
    let built = self.build(&graph, &fetched.sources).await?;
    let artifacts = self.package(&graph)?;

    info!(libs = ?artifacts.libs, "pipeline complete");
    Ok(PipelineOutcome {
      graph,
      built,
      artifacts,
      warnings: fetched.warnings,
    })
  }

  fn remove_stale_artifacts(&self) -> Result<(), PipelineError> {
    let path = self.layout.artifacts_path();
    if remove_file_if_exists(&path).map_err(|source| PipelineError::StaleArtifacts {
      path: path.clone(),
      source,
    })? {
      info!(path = %path.display(), "removed previous artifact set");
    }
    Ok(())
  }
}

/// Default output directory for a recipe.
pub fn default_out_dir(recipe_dir: &Path) -> PathBuf {
  recipe_dir.join("pakt-out")
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::registry::MemoryRegistry;
  use crate::source::RetryPolicy;
  use std::fs;
  use std::time::Duration;
  use tempfile::TempDir;

  /// Registry recipe for a package built by a shell script from a local tree.
  fn shell_recipe(name: &str, version: &str, src: &Path, requires: &str, compile: &str) -> String {
    format!(
      r#"
[package]
name = "{name}"
version = "{version}"
libs = ["{name}"]

[source]
path = "{src}"

[requires]
{requires}

[backend]
program = "/bin/sh"
configure = ["-c", "test -d $${{source}}"]
build = ["-c", "{compile}"]
install = ["-c", "mkdir -p $${{prefix}}/lib $${{prefix}}/include && touch $${{prefix}}/lib/lib{name}.a && cp $${{source}}/*.h $${{prefix}}/include/"]
"#,
      src = src.display(),
    )
  }

  struct World {
    temp_dir: TempDir,
    registry: MemoryRegistry,
  }

  impl World {
    fn new() -> Self {
      Self {
        temp_dir: TempDir::new().unwrap(),
        registry: MemoryRegistry::new(),
      }
    }

    fn package(&mut self, name: &str, version: &str, requires: &str, compile: &str) {
      let src = self.temp_dir.path().join("src").join(format!("{name}-{version}"));
      fs::create_dir_all(&src).unwrap();
      fs::write(src.join(format!("{}.h", name.to_lowercase())), "#pragma once\n").unwrap();
      self
        .registry
        .insert_toml(&shell_recipe(name, version, &src, requires, compile))
        .unwrap();
    }

    fn pipeline(self, root: &str) -> (TempDir, Pipeline) {
      let recipe_dir = self.temp_dir.path().join("app");
      fs::create_dir_all(&recipe_dir).unwrap();
      let recipe_path = recipe_dir.join("pakt.toml");
      fs::write(&recipe_path, root).unwrap();
      let recipe = Recipe::load(&recipe_path).unwrap();

      let settings = settings_for(&recipe, None).unwrap();
      let layout = OutputLayout::new(recipe_dir.join("out"));
      let acquirer = Acquirer::new(self.temp_dir.path().join("cache")).with_retry(RetryPolicy {
        attempts: 1,
        base_delay: Duration::from_millis(1),
      });
      let pipeline = Pipeline::new(recipe, Arc::new(self.registry), settings, layout).with_acquirer(acquirer);
      (self.temp_dir, pipeline)
    }
  }

  const ROOT: &str = r#"
[package]
name = "app"
version = "0.1.0"

[requires]
A = ">=1.0"
B = ">=2.0"
"#;

  fn two_packages(world: &mut World, b_compile: &str) {
    world.package("A", "1.0", "", "true");
    world.package("A", "1.2", "B = \">=2.0\"", "true");
    world.package("B", "2.0", "", "true");
    world.package("B", "2.1", "", b_compile);
  }

  #[tokio::test]
  async fn end_to_end_publishes_dependents_first() {
    let mut world = World::new();
    two_packages(&mut world, "true");
    let (_temp_dir, pipeline) = world.pipeline(ROOT);

    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.graph.get("A").unwrap().id(), "A@1.2");
    assert_eq!(outcome.graph.get("B").unwrap().id(), "B@2.1");
    assert_eq!(outcome.artifacts.libs, vec!["A", "B"]);
    assert!(
      outcome
        .artifacts
        .include_dirs
        .contains(&pipeline.layout().include_dir("A"))
    );
    assert!(pipeline.layout().include_dir("A").join("a.h").exists());

    let written = ArtifactSet::load(&pipeline.layout().artifacts_path()).unwrap();
    assert_eq!(written, outcome.artifacts);
  }

  #[tokio::test]
  async fn compile_failure_publishes_nothing() {
    let mut world = World::new();
    two_packages(&mut world, "echo 'b.c:1:1: error: unknown type name' >&2; exit 1");
    let (_temp_dir, pipeline) = world.pipeline(ROOT);

    // Left over from an earlier successful run.
    fs::create_dir_all(pipeline.layout().root()).unwrap();
    fs::write(pipeline.layout().artifacts_path(), "{}").unwrap();

    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage(), Stage::Build);
    let message = err.to_string();
    assert!(message.starts_with("build: compile step of 'B@2.1' failed"));
    assert!(message.contains("b.c:1:1: error: unknown type name"));
    assert!(!pipeline.layout().artifacts_path().exists());
  }

  #[tokio::test]
  async fn unresolvable_constraint_is_a_resolve_error() {
    let mut world = World::new();
    two_packages(&mut world, "true");
    let (_temp_dir, pipeline) = world.pipeline(
      r#"
[package]
name = "app"
version = "0.1.0"

[requires]
A = ">=1.0"
B = "<2.0"
"#,
    );

    let err = pipeline.run().await.unwrap_err();
    assert_eq!(err.stage(), Stage::Resolve);
    assert!(err.to_string().starts_with("resolve: "));
  }

  #[tokio::test]
  async fn incompatible_settings_stop_before_building() {
    let mut world = World::new();
    two_packages(&mut world, "true");
    let (_temp_dir, pipeline) = world.pipeline(
      r#"
[package]
name = "app"
version = "0.1.0"

[settings]
build_mode = "debug"

[requires]
A = ">=1.0"

[supports]
build_modes = ["release"]
"#,
    );

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(
      err,
      PipelineError::Configure(ToolchainError::IncompatibleSettings { .. })
    ));
    assert!(!pipeline.layout().build_dir("A").exists());
  }

  #[tokio::test]
  async fn lock_file_records_sources() {
    let mut world = World::new();
    two_packages(&mut world, "true");
    let (_temp_dir, pipeline) = world.pipeline(ROOT);

    let graph = pipeline.resolve().unwrap();
    let first = pipeline.fetch(&graph).await.unwrap();
    let second = pipeline.fetch(&graph).await.unwrap();

    assert!(first.lock_updated);
    assert!(!second.lock_updated);

    let lock_path = pipeline.recipe().dir.as_ref().unwrap().join(LOCK_FILENAME);
    let lock = LockFile::load(&lock_path).unwrap().unwrap();
    assert_eq!(lock.get("A").unwrap().version, "1.2");
    assert_eq!(lock.get("B").unwrap().rev, source::LOCAL_REV);
  }

  #[test]
  fn errors_name_their_stage() {
    let err = PipelineError::Package(PackageError::EmptyArtifactSet);
    assert_eq!(err.stage(), Stage::Package);
    assert_eq!(err.to_string(), "package: no libraries to publish");
  }
}
