//! Toolchain description generation.
//!
//! Turns the resolved graph and build settings into the two files a CMake
//! build consumes:
//!
//! - `pakt_toolchain.cmake`: target system, compilers, build type, install
//!   prefix, dependency search path and every package option.
//! - `pakt_deps.cmake`: include directories, library directories, libraries
//!   and defines of every transitive dependency.
//!
//! Describing is pure. Only [`generate`] touches the filesystem.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::layout::OutputLayout;
use crate::recipe::OptionValue;
use crate::resolve::{ResolvedGraph, ResolvedNode};
use crate::settings::BuildSettings;
use crate::util::fs::write_atomic;

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("'{package}' does not support {setting} '{value}' (supported: {})", .supported.join(", "))]
  IncompatibleSettings {
    package: String,
    setting: &'static str,
    value: String,
    supported: Vec<String>,
  },

  #[error("'{0}' is not part of the resolved graph")]
  UnknownPackage(String),

  #[error("failed to write '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Ordered key/value configuration for one package's backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainDescription {
  pub package: String,
  pub entries: Vec<(String, String)>,
}

impl ToolchainDescription {
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  /// Render as a CMake toolchain file that includes `deps_file`.
  pub fn render_cmake(&self, deps_file: &Path) -> String {
    let mut out = format!("# Generated by pakt for {}. Do not edit.\n\n", self.package);
    for (key, value) in &self.entries {
      let _ = writeln!(out, "set({key} {})", quote(value));
    }
    let _ = writeln!(out, "\ninclude({})", quote(&cmake_path(deps_file)));
    out
  }
}

/// What a package needs to know about one of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInfo {
  pub name: String,
  pub version: String,
  pub prefix: PathBuf,
  pub include_dirs: Vec<PathBuf>,
  pub lib_dirs: Vec<PathBuf>,
  pub libs: Vec<String>,
  pub defines: Vec<String>,
}

/// Paths of the generated files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainFiles {
  pub toolchain: PathBuf,
  pub deps: PathBuf,
}

/// Check every package in the graph accepts the settings.
pub fn check_compatible(graph: &ResolvedGraph, settings: &BuildSettings) -> Result<(), ToolchainError> {
  for node in graph.nodes.values() {
    if let Some(unsupported) = node.supports.check(settings) {
      return Err(ToolchainError::IncompatibleSettings {
        package: node.id(),
        setting: unsupported.setting,
        value: unsupported.value,
        supported: unsupported.supported,
      });
    }
  }
  Ok(())
}

/// Toolchain entries for building `package`.
pub fn describe(
  graph: &ResolvedGraph,
  package: &str,
  settings: &BuildSettings,
  layout: &OutputLayout,
) -> Result<ToolchainDescription, ToolchainError> {
  let node = graph
    .get(package)
    .ok_or_else(|| ToolchainError::UnknownPackage(package.to_string()))?;

  let mut entries: Vec<(String, String)> = Vec::new();
  let mut set = |key: &str, value: String| entries.push((key.to_string(), value));

  let platform = settings.platform();
  set("CMAKE_SYSTEM_NAME", settings.os.cmake_system_name().to_string());
  set("CMAKE_SYSTEM_PROCESSOR", platform.cmake_processor().to_string());
  set("PAKT_CROSS_BUILDING", on_off(platform.is_cross()).to_string());
  if let Some((cc, cxx)) = settings.compiler.executables() {
    set("CMAKE_C_COMPILER", cc.to_string());
    set("CMAKE_CXX_COMPILER", cxx.to_string());
  }
  set("PAKT_COMPILER", settings.compiler.name.clone());
  if let Some(version) = &settings.compiler.version {
    set("PAKT_COMPILER_VERSION", version.clone());
  }
  set("CMAKE_BUILD_TYPE", settings.build_mode.cmake_build_type().to_string());
  set("CMAKE_INSTALL_PREFIX", cmake_path(&layout.prefix(package)));

  let prefixes: Vec<String> = dependency_order(graph, node)
    .iter()
    .map(|dep| cmake_path(&layout.prefix(&dep.name)))
    .collect();
  set("CMAKE_PREFIX_PATH", prefixes.join(";"));

  set("BUILD_SHARED_LIBS", on_off(node.is_shared()).to_string());
  if let Some(fpic) = node.options.get("fpic").and_then(OptionValue::as_bool) {
    set("CMAKE_POSITION_INDEPENDENT_CODE", on_off(fpic).to_string());
  }
  for (key, value) in &node.options {
    let value = match value.as_bool() {
      Some(b) => on_off(b).to_string(),
      None => value.to_string(),
    };
    set(&format!("PAKT_OPTION_{}", cmake_identifier(key)), value);
  }

  Ok(ToolchainDescription {
    package: package.to_string(),
    entries,
  })
}

/// Transitive dependencies of `package`, dependencies first.
pub fn describe_dependencies(
  graph: &ResolvedGraph,
  package: &str,
  layout: &OutputLayout,
) -> Result<Vec<DependencyInfo>, ToolchainError> {
  let node = graph
    .get(package)
    .ok_or_else(|| ToolchainError::UnknownPackage(package.to_string()))?;

  Ok(
    dependency_order(graph, node)
      .into_iter()
      .map(|dep| DependencyInfo {
        name: dep.name.clone(),
        version: dep.version.to_string(),
        prefix: layout.prefix(&dep.name),
        include_dirs: vec![layout.include_dir(&dep.name)],
        lib_dirs: vec![layout.lib_dir(&dep.name)],
        libs: dep.libs.clone(),
        defines: dep.defines.clone(),
      })
      .collect(),
  )
}

/// Render the dependency description as CMake.
///
/// `PAKT_LINK_LIBRARIES` lists every library in link order (dependents first).
pub fn render_deps(package: &str, deps: &[DependencyInfo]) -> String {
  let mut out = format!("# Generated by pakt for {package}. Do not edit.\n");

  for dep in deps {
    let var = format!("PAKT_{}", cmake_identifier(&dep.name));
    let join_paths = |paths: &[PathBuf]| paths.iter().map(|p| cmake_path(p)).collect::<Vec<_>>().join(";");

    let _ = writeln!(out);
    let _ = writeln!(out, "set({var}_FOUND TRUE)");
    let _ = writeln!(out, "set({var}_VERSION {})", quote(&dep.version));
    let _ = writeln!(out, "set({var}_ROOT {})", quote(&cmake_path(&dep.prefix)));
    let _ = writeln!(out, "set({var}_INCLUDE_DIRS {})", quote(&join_paths(&dep.include_dirs)));
    let _ = writeln!(out, "set({var}_LIBRARY_DIRS {})", quote(&join_paths(&dep.lib_dirs)));
    let _ = writeln!(out, "set({var}_LIBRARIES {})", quote(&dep.libs.join(";")));
    let _ = writeln!(out, "set({var}_DEFINES {})", quote(&dep.defines.join(";")));
  }

  let names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
  let link: Vec<&str> = deps
    .iter()
    .rev()
    .flat_map(|d| d.libs.iter().map(String::as_str))
    .collect();
  let _ = writeln!(out);
  let _ = writeln!(out, "set(PAKT_DEPENDENCIES {})", quote(&names.join(";")));
  let _ = writeln!(out, "set(PAKT_LINK_LIBRARIES {})", quote(&link.join(";")));
  out
}

/// Write both files for `package` into its generated directory.
pub fn generate(
  graph: &ResolvedGraph,
  package: &str,
  settings: &BuildSettings,
  layout: &OutputLayout,
) -> Result<ToolchainFiles, ToolchainError> {
  let description = describe(graph, package, settings, layout)?;
  let deps = describe_dependencies(graph, package, layout)?;

  let files = ToolchainFiles {
    toolchain: layout.toolchain_path(package),
    deps: layout.deps_path(package),
  };

  write(&files.deps, &render_deps(package, &deps))?;
  write(&files.toolchain, &description.render_cmake(&files.deps))?;

  info!(package, toolchain = %files.toolchain.display(), "toolchain generated");
  Ok(files)
}

fn write(path: &Path, content: &str) -> Result<(), ToolchainError> {
  let write_error = |source| ToolchainError::Write {
    path: path.to_path_buf(),
    source,
  };
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(write_error)?;
  }
  write_atomic(path, content.as_bytes()).map_err(write_error)?;
  debug!(path = %path.display(), "wrote generated file");
  Ok(())
}

fn dependency_order<'a>(graph: &'a ResolvedGraph, node: &ResolvedNode) -> Vec<&'a ResolvedNode> {
  let transitive = graph.transitive_dependencies(&node.name);
  graph
    .dependencies_first()
    .into_iter()
    .filter(|dep| transitive.contains(&dep.name))
    .collect()
}

fn on_off(value: bool) -> &'static str {
  if value { "ON" } else { "OFF" }
}

/// CMake paths use forward slashes on every platform.
fn cmake_path(path: &Path) -> String {
  path.to_string_lossy().replace('\\', "/")
}

/// Quote a value as a CMake bracket-free string argument.
fn quote(value: &str) -> String {
  let mut quoted = String::with_capacity(value.len() + 2);
  quoted.push('"');
  for ch in value.chars() {
    match ch {
      '\\' | '"' | '$' => {
        quoted.push('\\');
        quoted.push(ch);
      }
      '\n' => quoted.push_str("\\n"),
      _ => quoted.push(ch),
    }
  }
  quoted.push('"');
  quoted
}

/// Upper-case identifier usable in a CMake variable name.
fn cmake_identifier(name: &str) -> String {
  name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect()
}
