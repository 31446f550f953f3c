//! Shared helpers: a registry directory written package by package.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub struct RegistryDir {
  pub temp: TempDir,
}

impl RegistryDir {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn root(&self) -> PathBuf {
    self.temp.path().join("registry")
  }

  /// Add `<name>/<version>.toml` with the given extra sections.
  pub fn add(&self, name: &str, version: &str, body: &str) -> &Self {
    let dir = self.root().join(name);
    fs::create_dir_all(&dir).unwrap();
    let content = format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\nlibs = [\"{name}\"]\n\n{body}");
    fs::write(dir.join(format!("{version}.toml")), content).unwrap();
    self
  }

  /// Add a package built from a local header-only tree by `/bin/sh`.
  pub fn add_shell(&self, name: &str, version: &str, requires: &str) -> &Self {
    let src = self.temp.path().join("sources").join(format!("{name}-{version}"));
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join(format!("{}.h", name.to_lowercase())), "#pragma once\n").unwrap();

    let body = format!(
      r#"[source]
path = "{src}"

[requires]
{requires}

[backend]
program = "/bin/sh"
configure = ["-c", "test -f $${{toolchain}} && test -f $${{deps}}"]
build = ["-c", "true"]
install = ["-c", "mkdir -p $${{prefix}}/lib $${{prefix}}/include && touch $${{prefix}}/lib/lib{name}.a && cp $${{source}}/*.h $${{prefix}}/include/"]
"#,
      src = src.display(),
    );
    self.add(name, version, &body)
  }

  /// Write a root recipe into its own directory and return its path.
  pub fn root_recipe(&self, content: &str) -> PathBuf {
    let dir = self.temp.path().join("app");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("pakt.toml");
    fs::write(&path, content).unwrap();
    path
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.temp.path().join(relative)
  }
}

pub fn read(path: &Path) -> String {
  fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}
