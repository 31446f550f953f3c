//! Directory layout of a build output tree.
//!
//! ```text
//! <out>/
//!   artifacts.json
//!   build/<package>/            backend build directory
//!   build/<package>/pakt/       generated toolchain and dependency files
//!   install/<package>/          install prefix (include/, lib/)
//! ```

use std::path::{Path, PathBuf};

use crate::consts::{ARTIFACTS_FILENAME, DEPS_FILENAME, TOOLCHAIN_FILENAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
  root: PathBuf,
}

impl OutputLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn artifacts_path(&self) -> PathBuf {
    self.root.join(ARTIFACTS_FILENAME)
  }

  pub fn build_dir(&self, package: &str) -> PathBuf {
    self.root.join("build").join(package)
  }

  pub fn generated_dir(&self, package: &str) -> PathBuf {
    self.build_dir(package).join("pakt")
  }

  pub fn toolchain_path(&self, package: &str) -> PathBuf {
    self.generated_dir(package).join(TOOLCHAIN_FILENAME)
  }

  pub fn deps_path(&self, package: &str) -> PathBuf {
    self.generated_dir(package).join(DEPS_FILENAME)
  }

  pub fn prefix(&self, package: &str) -> PathBuf {
    self.root.join("install").join(package)
  }

  pub fn include_dir(&self, package: &str) -> PathBuf {
    self.prefix(package).join("include")
  }

  pub fn lib_dir(&self, package: &str) -> PathBuf {
    self.prefix(package).join("lib")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn package_directories() {
    let layout = OutputLayout::new("/out");
    assert_eq!(layout.build_dir("libuv"), PathBuf::from("/out/build/libuv"));
    assert_eq!(
      layout.toolchain_path("libuv"),
      PathBuf::from("/out/build/libuv/pakt/pakt_toolchain.cmake")
    );
    assert_eq!(layout.lib_dir("libuv"), PathBuf::from("/out/install/libuv/lib"));
    assert_eq!(layout.artifacts_path(), PathBuf::from("/out/artifacts.json"));
  }
}
