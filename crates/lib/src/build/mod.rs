//! Build driver.
//!
//! Runs each package's backend configure, compile and install steps, one
//! package at a time in dependency order, so every consumer is configured
//! against already-installed dependency prefixes.
//!
//! The driver owns working directories, build mode selection and process
//! lifetime. Compilation itself belongs to the backend, whose output is
//! carried through errors untouched.
//!
//! # Submodules
//!
//! - [`backend`] - Step arguments and placeholder substitution
//! - [`process`] - Process-group execution and cancellation

pub mod backend;
pub mod process;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

pub use backend::{BuildContext, Invocation, Step};
pub use process::{CancelHandle, CancelToken, ProcessError, ProcessOutput, cancellation};

use crate::layout::OutputLayout;
use crate::placeholder::PlaceholderError;
use crate::resolve::{ResolvedGraph, ResolvedNode};
use crate::settings::BuildSettings;
use crate::source::AcquiredSource;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("configure step of '{package}' failed ({status})\n{}", diagnostics(.stdout, .stderr))]
  Configure {
    package: String,
    status: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
  },

  #[error("compile step of '{package}' failed ({status})\n{}", diagnostics(.stdout, .stderr))]
  Compile {
    package: String,
    status: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
  },

  #[error("install step of '{package}' failed ({status})\n{}", diagnostics(.stdout, .stderr))]
  Install {
    package: String,
    status: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
  },

  #[error("build of '{package}' cancelled during {step}")]
  Cancelled { package: String, step: Step },

  #[error("failed to run {step} step of '{package}': {source}")]
  Process {
    package: String,
    step: Step,
    #[source]
    source: ProcessError,
  },

  #[error("invalid backend arguments for '{package}': {source}")]
  Placeholder {
    package: String,
    #[source]
    source: PlaceholderError,
  },

  #[error("failed to prepare '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl BuildError {
  fn step_failed(step: Step, package: &str, output: ProcessOutput) -> Self {
    let package = package.to_string();
    let status = output.status.to_string();
    let (stdout, stderr) = (output.stdout, output.stderr);
    match step {
      Step::Configure => BuildError::Configure {
        package,
        status,
        stdout,
        stderr,
      },
      Step::Compile => BuildError::Compile {
        package,
        status,
        stdout,
        stderr,
      },
      Step::Install => BuildError::Install {
        package,
        status,
        stdout,
        stderr,
      },
    }
  }

  /// Raw backend output (stdout, stderr) for failed steps.
  pub fn backend_output(&self) -> Option<(&[u8], &[u8])> {
    match self {
      BuildError::Configure { stdout, stderr, .. }
      | BuildError::Compile { stdout, stderr, .. }
      | BuildError::Install { stdout, stderr, .. } => Some((stdout.as_slice(), stderr.as_slice())),
      _ => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, BuildError::Cancelled { .. })
  }
}

fn diagnostics(stdout: &[u8], stderr: &[u8]) -> String {
  format!("{}{}", String::from_utf8_lossy(stdout), String::from_utf8_lossy(stderr))
}

/// A package after the driver has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
  pub name: String,
  pub version: String,
  pub prefix: PathBuf,
  /// No source: nothing was run and the prefix may be empty.
  pub skipped: bool,
}

/// Drives backend builds for a resolved graph.
pub struct BuildDriver<'a> {
  graph: &'a ResolvedGraph,
  settings: &'a BuildSettings,
  layout: &'a OutputLayout,
  sources: &'a BTreeMap<String, AcquiredSource>,
  cancel: CancelToken,
}

impl<'a> BuildDriver<'a> {
  pub fn new(
    graph: &'a ResolvedGraph,
    settings: &'a BuildSettings,
    layout: &'a OutputLayout,
    sources: &'a BTreeMap<String, AcquiredSource>,
  ) -> Self {
    Self {
      graph,
      settings,
      layout,
      sources,
      cancel: CancelToken::never(),
    }
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Build every package, dependencies first, stopping at the first failure.
  pub async fn build_all(&self) -> Result<Vec<BuiltPackage>, BuildError> {
    let order = self.graph.dependencies_first();
    info!(count = order.len(), mode = %self.settings.build_mode, "building packages");

    let mut built = Vec::with_capacity(order.len());
    for node in order {
      built.push(self.build_package(node).await?);
    }
    Ok(built)
  }

  /// Configure, compile and install one package.
  pub async fn build_package(&self, node: &ResolvedNode) -> Result<BuiltPackage, BuildError> {
    let prefix = self.layout.prefix(&node.name);
    let Some(source) = self.sources.get(&node.name) else {
      debug!(package = %node.name, "no source, nothing to build");
      return Ok(BuiltPackage {
        name: node.name.clone(),
        version: node.version.to_string(),
        prefix,
        skipped: true,
      });
    };

    let build_dir = self.layout.build_dir(&node.name);
    create_dir(&build_dir).await?;
    // A previous install must not satisfy this build's artifact checks.
    if fs::try_exists(&prefix).await.unwrap_or(false) {
      fs::remove_dir_all(&prefix).await.map_err(|source| BuildError::Io {
        path: prefix.clone(),
        source,
      })?;
    }
    create_dir(&prefix).await?;

    let ctx = self.context(node, &source.path);
    let placeholder_error = |source| BuildError::Placeholder {
      package: node.id(),
      source,
    };
    let invocations = backend::plan(&node.backend, &ctx).map_err(placeholder_error)?;
    let env = backend::environment(&node.backend, &ctx).map_err(placeholder_error)?;

    info!(package = %node.id(), source = %source.path.display(), "building package");
    for invocation in invocations {
      self.run_step(node, &invocation, &build_dir, &env).await?;
    }
    info!(package = %node.id(), prefix = %prefix.display(), "package installed");

    Ok(BuiltPackage {
      name: node.name.clone(),
      version: node.version.to_string(),
      prefix,
      skipped: false,
    })
  }

  async fn run_step(
    &self,
    node: &ResolvedNode,
    invocation: &Invocation,
    cwd: &Path,
    env: &BTreeMap<String, String>,
  ) -> Result<(), BuildError> {
    let step = invocation.step;
    info!(package = %node.name, %step, program = %invocation.program, "running backend step");

    let output = process::run(&invocation.program, &invocation.args, cwd, env, &self.cancel)
      .await
      .map_err(|source| match source {
        ProcessError::Cancelled => BuildError::Cancelled {
          package: node.id(),
          step,
        },
        source => BuildError::Process {
          package: node.id(),
          step,
          source,
        },
      })?;

    if !output.stdout.is_empty() {
      debug!(package = %node.name, %step, stdout = %String::from_utf8_lossy(&output.stdout), "backend stdout");
    }
    if !output.stderr.is_empty() {
      debug!(package = %node.name, %step, stderr = %String::from_utf8_lossy(&output.stderr), "backend stderr");
    }

    if !output.success() {
      return Err(BuildError::step_failed(step, &node.id(), output));
    }
    Ok(())
  }

  fn context(&self, node: &ResolvedNode, source: &Path) -> BuildContext {
    let dep_prefixes = self
      .graph
      .transitive_dependencies(&node.name)
      .into_iter()
      .map(|dep| {
        let prefix = BuildContext::path_string(&self.layout.prefix(&dep));
        (dep, prefix)
      })
      .collect();

    BuildContext {
      package: node.name.clone(),
      source: BuildContext::path_string(source),
      build: BuildContext::path_string(&self.layout.build_dir(&node.name)),
      prefix: BuildContext::path_string(&self.layout.prefix(&node.name)),
      toolchain: BuildContext::path_string(&self.layout.toolchain_path(&node.name)),
      deps: BuildContext::path_string(&self.layout.deps_path(&node.name)),
      mode: self.settings.build_mode.cmake_build_type().to_string(),
      dep_prefixes,
    }
  }
}

async fn create_dir(path: &Path) -> Result<(), BuildError> {
  fs::create_dir_all(path).await.map_err(|source| BuildError::Io {
    path: path.to_path_buf(),
    source,
  })
}
