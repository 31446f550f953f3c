//! Shared test helpers for CLI integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture directory.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

fn copy_tree(from: &Path, to: &Path) {
  fs::create_dir_all(to).unwrap();
  for entry in fs::read_dir(from).unwrap() {
    let entry = entry.unwrap();
    let target = to.join(entry.file_name());
    if entry.file_type().unwrap().is_dir() {
      copy_tree(&entry.path(), &target);
    } else {
      fs::copy(entry.path(), &target).unwrap();
    }
  }
}

/// Isolated test environment.
///
/// Each test gets its own copy of a fixture project and its own source cache.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Copy a fixture project into a fresh temporary directory.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    copy_tree(&fixture_path(name), &temp.path().join("project"));
    Self { temp }
  }

  /// Project root (canonical, so paths compare equal to what pakt prints).
  pub fn project(&self) -> PathBuf {
    let p = self.temp.path().join("project");
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn recipe_path(&self) -> PathBuf {
    self.project().join("pakt.toml")
  }

  pub fn out_path(&self) -> PathBuf {
    self.project().join("pakt-out")
  }

  pub fn cache_path(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.project().join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }

  /// A `pakt` command with an isolated cache and no inherited registry.
  pub fn pakt(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("pakt");
    cmd
      .current_dir(self.project())
      .env("PAKT_CACHE_DIR", self.cache_path())
      .env_remove("PAKT_REGISTRY")
      .env_remove("RUST_LOG")
      .arg("--color")
      .arg("never");
    cmd
  }
}
