use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operating system variants pakt can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Os {
  #[serde(rename = "linux")]
  Linux,
  #[serde(rename = "darwin", alias = "macos")]
  MacOs,
  #[serde(rename = "windows")]
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// Value of `CMAKE_SYSTEM_NAME` for this OS
  pub fn cmake_system_name(&self) -> &'static str {
    match self {
      Self::Linux => "Linux",
      Self::MacOs => "Darwin",
      Self::Windows => "Windows",
    }
  }

  /// File names a library called `name` may be installed under.
  pub fn library_file_names(&self, name: &str, shared: bool) -> Vec<String> {
    match (self, shared) {
      (Self::Windows, false) => vec![format!("{name}.lib"), format!("lib{name}.a")],
      (Self::Windows, true) => vec![format!("{name}.dll"), format!("{name}.lib")],
      (Self::MacOs, false) | (Self::Linux, false) => vec![format!("lib{name}.a")],
      (Self::MacOs, true) => vec![format!("lib{name}.dylib")],
      (Self::Linux, true) => vec![format!("lib{name}.so")],
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Os {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(format!("unsupported os '{other}'")),
    }
  }
}
