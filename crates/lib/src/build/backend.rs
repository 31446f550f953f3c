//! Backend invocation: which program runs for each step, with which arguments.
//!
//! Packages without a `[backend]` section are built with CMake. A recipe may
//! replace the program or any step's argument list; arguments go through
//! placeholder substitution against the package's directories.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::placeholder::{self, PlaceholderError, Resolver, Var};
use crate::recipe::BackendDecl;

/// Program used when the recipe does not name one.
pub const DEFAULT_PROGRAM: &str = "cmake";

/// A backend step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
  Configure,
  Compile,
  Install,
}

impl Step {
  pub const ALL: [Step; 3] = [Step::Configure, Step::Compile, Step::Install];

  pub fn as_str(&self) -> &'static str {
    match self {
      Step::Configure => "configure",
      Step::Compile => "compile",
      Step::Install => "install",
    }
  }

  /// CMake arguments for this step.
  pub fn default_args(&self) -> Vec<String> {
    let args: &[&str] = match self {
      Step::Configure => &[
        "-S",
        "$${source}",
        "-B",
        "$${build}",
        "-DCMAKE_TOOLCHAIN_FILE=$${toolchain}",
        "-DCMAKE_BUILD_TYPE=$${mode}",
        "-DCMAKE_INSTALL_PREFIX=$${prefix}",
      ],
      Step::Compile => &["--build", "$${build}", "--config", "$${mode}"],
      Step::Install => &["--install", "$${build}", "--config", "$${mode}", "--prefix", "$${prefix}"],
    };
    args.iter().map(|s| s.to_string()).collect()
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Concrete values for one package's placeholders.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
  pub package: String,
  pub source: String,
  pub build: String,
  pub prefix: String,
  pub toolchain: String,
  pub deps: String,
  pub mode: String,
  /// Install prefixes of the package's transitive dependencies.
  pub dep_prefixes: BTreeMap<String, String>,
}

impl BuildContext {
  pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
  }

  /// Environment exported to every backend step.
  pub fn env(&self) -> BTreeMap<String, String> {
    BTreeMap::from([
      ("PAKT_PACKAGE".to_string(), self.package.clone()),
      ("PAKT_SOURCE_DIR".to_string(), self.source.clone()),
      ("PAKT_BUILD_DIR".to_string(), self.build.clone()),
      ("PAKT_PREFIX".to_string(), self.prefix.clone()),
      ("PAKT_TOOLCHAIN_FILE".to_string(), self.toolchain.clone()),
      ("PAKT_BUILD_TYPE".to_string(), self.mode.clone()),
    ])
  }
}

impl Resolver for BuildContext {
  fn resolve_var(&self, var: Var) -> Result<&str, PlaceholderError> {
    Ok(match var {
      Var::Source => &self.source,
      Var::Build => &self.build,
      Var::Prefix => &self.prefix,
      Var::Toolchain => &self.toolchain,
      Var::Deps => &self.deps,
      Var::Mode => &self.mode,
      Var::Package => &self.package,
    })
  }

  fn resolve_dep(&self, name: &str) -> Result<&str, PlaceholderError> {
    self
      .dep_prefixes
      .get(name)
      .map(String::as_str)
      .ok_or_else(|| PlaceholderError::UnresolvedDep(name.to_string()))
  }
}

/// One step ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub step: Step,
  pub program: String,
  pub args: Vec<String>,
}

/// Substitute the backend's argument templates for every step.
pub fn plan(decl: &BackendDecl, ctx: &BuildContext) -> Result<Vec<Invocation>, PlaceholderError> {
  let program = decl.program.as_deref().unwrap_or(DEFAULT_PROGRAM);

  Step::ALL
    .iter()
    .map(|&step| {
      let templates = match step {
        Step::Configure => decl.configure.clone(),
        Step::Compile => decl.build.clone(),
        Step::Install => decl.install.clone(),
      }
      .unwrap_or_else(|| step.default_args());

      let args = templates
        .iter()
        .map(|arg| placeholder::substitute(arg, ctx))
        .collect::<Result<Vec<_>, _>>()?;

      Ok(Invocation {
        step,
        program: program.to_string(),
        args,
      })
    })
    .collect()
}

/// Environment for a step: the package context, then the recipe's `[backend].env`.
pub fn environment(decl: &BackendDecl, ctx: &BuildContext) -> Result<BTreeMap<String, String>, PlaceholderError> {
  let mut env = ctx.env();
  for (key, value) in &decl.env {
    env.insert(key.clone(), placeholder::substitute(value, ctx)?);
  }
  Ok(env)
}
