//! Build settings threaded through every pipeline stage.
//!
//! Settings are assembled once (host defaults, then recipe `[settings]`, then
//! command-line overrides) and never change after the pipeline starts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;
use crate::platform::arch::Arch;
use crate::platform::os::Os;

/// Build mode passed to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
  Debug,
  #[default]
  Release,
}

impl BuildMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Debug => "debug",
      Self::Release => "release",
    }
  }

  /// Value of `CMAKE_BUILD_TYPE` / `--config` for this mode.
  pub fn cmake_build_type(&self) -> &'static str {
    match self {
      Self::Debug => "Debug",
      Self::Release => "Release",
    }
  }
}

impl fmt::Display for BuildMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for BuildMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "debug" => Ok(Self::Debug),
      "release" => Ok(Self::Release),
      other => Err(format!("unknown build mode '{other}', expected 'debug' or 'release'")),
    }
  }
}

/// Compiler identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compiler {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

impl Compiler {
  /// Default compiler family for an OS.
  pub fn default_for(os: Os) -> Self {
    let name = match os {
      Os::Linux => "gcc",
      Os::MacOs => "apple-clang",
      Os::Windows => "msvc",
    };
    Self {
      name: name.to_string(),
      version: None,
    }
  }

  /// C and C++ compiler executables for this family, if it has well-known ones.
  pub fn executables(&self) -> Option<(&'static str, &'static str)> {
    match self.name.as_str() {
      "gcc" => Some(("gcc", "g++")),
      "clang" | "apple-clang" => Some(("clang", "clang++")),
      "msvc" => Some(("cl", "cl")),
      _ => None,
    }
  }
}

impl fmt::Display for Compiler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.version {
      Some(version) => write!(f, "{}-{}", self.name, version),
      None => f.write_str(&self.name),
    }
  }
}

/// Immutable settings for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildSettings {
  pub os: Os,
  pub arch: Arch,
  pub compiler: Compiler,
  pub build_mode: BuildMode,
}

/// Settings as written in a recipe; every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsDecl {
  #[serde(default)]
  pub os: Option<Os>,
  #[serde(default)]
  pub arch: Option<Arch>,
  #[serde(default)]
  pub compiler: Option<String>,
  #[serde(default)]
  pub compiler_version: Option<String>,
  #[serde(default)]
  pub build_mode: Option<BuildMode>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("host platform {os}/{arch} is not supported; set [settings] os and arch explicitly")]
  UnsupportedHost { os: String, arch: String },
}

impl BuildSettings {
  /// Settings for the host with release mode.
  pub fn host() -> Result<Self, SettingsError> {
    let platform = Platform::current().ok_or_else(|| SettingsError::UnsupportedHost {
      os: std::env::consts::OS.to_string(),
      arch: std::env::consts::ARCH.to_string(),
    })?;
    Ok(Self::for_platform(platform))
  }

  /// Default settings for a platform.
  pub fn for_platform(platform: Platform) -> Self {
    Self {
      os: platform.os,
      arch: platform.arch,
      compiler: Compiler::default_for(platform.os),
      build_mode: BuildMode::default(),
    }
  }

  /// Apply recipe-declared settings over these defaults.
  pub fn with_decl(mut self, decl: &SettingsDecl) -> Self {
    if let Some(os) = decl.os {
      self.os = os;
      if decl.compiler.is_none() {
        self.compiler = Compiler::default_for(os);
      }
    }
    if let Some(arch) = decl.arch {
      self.arch = arch;
    }
    if let Some(name) = &decl.compiler {
      self.compiler = Compiler {
        name: name.clone(),
        version: None,
      };
    }
    if let Some(version) = &decl.compiler_version {
      self.compiler.version = Some(version.clone());
    }
    if let Some(mode) = decl.build_mode {
      self.build_mode = mode;
    }
    self
  }

  /// Override the build mode (command-line `--mode`).
  pub fn with_mode(mut self, mode: BuildMode) -> Self {
    self.build_mode = mode;
    self
  }

  pub fn platform(&self) -> Platform {
    Platform::new(self.arch, self.os)
  }
}

impl fmt::Display for BuildSettings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {} {}", self.platform(), self.compiler, self.build_mode)
  }
}
