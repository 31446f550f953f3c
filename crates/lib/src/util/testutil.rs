//! Test helpers shared by unit tests.
//!
//! Backend commands in tests run through the platform shell so scripts can
//! create files and fail on demand without a real compiler.

use std::path::Path;
use std::process::Command;

use crate::recipe::BackendDecl;

/// Backend whose configure, build and install steps each run a shell script.
#[cfg(unix)]
pub fn shell_backend(configure: &str, build: &str, install: &str) -> BackendDecl {
  let step = |script: &str| Some(vec!["-c".to_string(), script.to_string()]);
  BackendDecl {
    program: Some("/bin/sh".to_string()),
    configure: step(configure),
    build: step(build),
    install: step(install),
    env: Default::default(),
  }
}

#[cfg(windows)]
pub fn shell_backend(configure: &str, build: &str, install: &str) -> BackendDecl {
  let step = |script: &str| Some(vec!["/C".to_string(), script.to_string()]);
  BackendDecl {
    program: Some("cmd.exe".to_string()),
    configure: step(configure),
    build: step(build),
    install: step(install),
    env: Default::default(),
  }
}

/// Create a git repository at `dir` with the given files committed.
///
/// Returns the commit hash. Uses the `git` binary, which tests assume is on PATH.
pub fn git_repo(dir: &Path, files: &[(&str, &str)]) -> String {
  std::fs::create_dir_all(dir).unwrap();
  for (name, content) in files {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }

  let git = |args: &[&str]| {
    let output = Command::new("git")
      .args(args)
      .current_dir(dir)
      .env("GIT_AUTHOR_NAME", "pakt")
      .env("GIT_AUTHOR_EMAIL", "pakt@example.com")
      .env("GIT_COMMITTER_NAME", "pakt")
      .env("GIT_COMMITTER_EMAIL", "pakt@example.com")
      .output()
      .unwrap();
    assert!(output.status.success(), "git {args:?} failed: {output:?}");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
  };

  if !dir.join(".git").exists() {
    git(&["init", "-q", "-b", "main"]);
  }
  git(&["add", "-A"]);
  git(&["commit", "-q", "-m", "update"]);
  git(&["rev-parse", "HEAD"])
}
