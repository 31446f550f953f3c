//! Target platform: the `os` and `arch` build settings, and how CMake names them.

pub mod arch;
pub mod os;
pub mod paths;

use arch::Arch;
use os::Os;
use std::fmt;

/// An OS and architecture pair (e.g. "aarch64-darwin").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// The platform pakt is running on, if it is one packages can target.
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }

  /// Value of `CMAKE_SYSTEM_PROCESSOR`, which follows each OS's own naming.
  pub fn cmake_processor(&self) -> &'static str {
    match (self.os, self.arch) {
      (Os::MacOs, Arch::Aarch64) => "arm64",
      (Os::Windows, Arch::X86_64) => "AMD64",
      (Os::Windows, Arch::Aarch64) => "ARM64",
      (Os::Windows, Arch::X86) => "X86",
      (_, arch) => arch.as_str(),
    }
  }

  /// Whether building for this platform means cross-compiling from the host.
  pub fn is_cross(&self) -> bool {
    Self::current().is_none_or(|host| host != *self)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}
