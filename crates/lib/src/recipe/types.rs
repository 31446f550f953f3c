//! Recipe declaration types, as deserialized from TOML.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::version::{Constraint, PackageVersion};
use crate::platform::arch::Arch;
use crate::platform::os::Os;
use crate::settings::{BuildMode, BuildSettings, SettingsDecl};

/// Value of a package option (`shared = false`, `fpic = true`, `abi = "cxx11"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Integer(i64),
  String(String),
}

impl OptionValue {
  pub fn as_bool(&self) -> Option<bool> {
    match self {
      OptionValue::Bool(b) => Some(*b),
      OptionValue::String(s) => match s.as_str() {
        "true" | "True" | "ON" | "on" => Some(true),
        "false" | "False" | "OFF" | "off" => Some(false),
        _ => None,
      },
      OptionValue::Integer(_) => None,
    }
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionValue::Bool(b) => write!(f, "{b}"),
      OptionValue::Integer(i) => write!(f, "{i}"),
      OptionValue::String(s) => f.write_str(s),
    }
  }
}

/// Map of option names to values.
pub type Options = BTreeMap<String, OptionValue>;

/// Key in `[options]` that applies to every dependency.
pub const ALL_PACKAGES: &str = "*";

/// One declared dependency: a name, an acceptable version range and options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencySpec {
  pub name: String,
  pub constraint: Constraint,
  pub options: Options,
}

impl DependencySpec {
  pub fn new(name: impl Into<String>, constraint: Constraint) -> Self {
    Self {
      name: name.into(),
      constraint,
      options: Options::new(),
    }
  }

  pub fn with_option(mut self, key: impl Into<String>, value: OptionValue) -> Self {
    self.options.insert(key.into(), value);
    self
  }
}

/// `[package]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDecl {
  pub name: String,
  pub version: PackageVersion,
  /// Libraries this package installs, in the package's own link order.
  #[serde(default)]
  pub libs: Vec<String>,
  /// Preprocessor definitions consumers must set.
  #[serde(default)]
  pub defines: Vec<String>,
}

/// `[source]` section as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDecl {
  #[serde(default)]
  pub git: Option<String>,
  #[serde(default)]
  pub rev: Option<String>,
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(default)]
  pub branch: Option<String>,
  #[serde(default)]
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub allow_floating: bool,
}

/// `[supports]` section: settings this package can be built with.
///
/// An empty list accepts any value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Supports {
  #[serde(default)]
  pub os: Vec<Os>,
  #[serde(default)]
  pub arch: Vec<Arch>,
  #[serde(default)]
  pub compilers: Vec<String>,
  #[serde(default)]
  pub build_modes: Vec<BuildMode>,
}

/// A setting a package refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
  pub setting: &'static str,
  pub value: String,
  pub supported: Vec<String>,
}

impl Supports {
  /// Returns the first setting not accepted by this package.
  pub fn check(&self, settings: &BuildSettings) -> Option<Unsupported> {
    fn reject<T: ToString>(setting: &'static str, value: &T, supported: &[T]) -> Option<Unsupported> {
      Some(Unsupported {
        setting,
        value: value.to_string(),
        supported: supported.iter().map(ToString::to_string).collect(),
      })
    }

    if !self.os.is_empty() && !self.os.contains(&settings.os) {
      return reject("os", &settings.os, &self.os);
    }
    if !self.arch.is_empty() && !self.arch.contains(&settings.arch) {
      return reject("arch", &settings.arch, &self.arch);
    }
    if !self.compilers.is_empty() && !self.compilers.contains(&settings.compiler.name) {
      return reject("compiler", &settings.compiler.name, &self.compilers);
    }
    if !self.build_modes.is_empty() && !self.build_modes.contains(&settings.build_mode) {
      return reject("build_mode", &settings.build_mode, &self.build_modes);
    }
    None
  }
}

/// How the published link order is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOrderPolicy {
  /// Dependents before dependencies, computed from the graph.
  #[default]
  Derived,
  /// The literal list in `[link].libs`.
  Explicit,
}

/// `[link]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDecl {
  #[serde(default)]
  pub order: LinkOrderPolicy,
  #[serde(default)]
  pub libs: Vec<String>,
}

/// `[backend]` section: overrides of the default CMake invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendDecl {
  #[serde(default)]
  pub program: Option<String>,
  #[serde(default)]
  pub configure: Option<Vec<String>>,
  #[serde(default)]
  pub build: Option<Vec<String>>,
  #[serde(default)]
  pub install: Option<Vec<String>>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

/// A recipe file as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeFile {
  pub package: PackageDecl,
  #[serde(default)]
  pub source: Option<SourceDecl>,
  #[serde(default)]
  pub settings: SettingsDecl,
  /// Dependency name to constraint.
  #[serde(default)]
  pub requires: BTreeMap<String, String>,
  /// Option defaults for this package itself.
  #[serde(default)]
  pub default_options: Options,
  /// Options pushed onto dependencies, keyed by dependency name or `*`.
  #[serde(default)]
  pub options: BTreeMap<String, Options>,
  #[serde(default)]
  pub supports: Supports,
  #[serde(default)]
  pub link: LinkDecl,
  #[serde(default)]
  pub backend: BackendDecl,
}
