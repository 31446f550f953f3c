//! Tests for `pakt build`.

use predicates::prelude::*;
use serde_json::Value;

use crate::common::TestEnv;

const FAILING_B: &str = r#"
[package]
name = "B"
version = "2.1"
libs = ["B"]

[source]
path = "../../sources/B-2.1"

[backend]
program = "/bin/sh"
configure = ["-c", "true"]
build = ["-c", "echo 'b.c:3:5: error: unknown type name' >&2; exit 1"]
install = ["-c", "true"]
"#;

#[test]
fn build_selects_newest_compatible_versions() {
  let env = TestEnv::from_fixture("project");

  env
    .pakt()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built app@0.1.0"))
    .stdout(predicate::str::contains("A B"));

  let content = std::fs::read_to_string(env.out_path().join("artifacts.json")).unwrap();
  let artifacts: Value = serde_json::from_str(&content).unwrap();

  assert_eq!(artifacts["libs"], serde_json::json!(["A", "B"]));
  assert_eq!(artifacts["build_mode"], "release");
  let versions: Vec<_> = artifacts["packages"]
    .as_array()
    .unwrap()
    .iter()
    .map(|p| format!("{}@{}", p["name"].as_str().unwrap(), p["version"].as_str().unwrap()))
    .collect();
  assert_eq!(versions, vec!["app@0.1.0", "A@1.2", "B@2.1"]);
  assert!(env.out_path().join("install/A/include/a.h").exists());
}

#[test]
fn build_json_prints_artifact_set() {
  let env = TestEnv::from_fixture("project");

  let output = env.pakt().args(["build", "--format", "json"]).output().unwrap();
  assert!(output.status.success());

  let artifacts: Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(artifacts["package"], "app");
  assert_eq!(artifacts["libs"], serde_json::json!(["A", "B"]));
}

#[test]
fn build_mode_flag_overrides_recipe() {
  let env = TestEnv::from_fixture("project");

  env.pakt().args(["build", "--mode", "debug"]).assert().success();

  let toolchain = std::fs::read_to_string(env.out_path().join("build/B/pakt/pakt_toolchain.cmake")).unwrap();
  assert!(toolchain.contains("set(CMAKE_BUILD_TYPE \"Debug\")"));
}

#[test]
fn compile_failure_exits_non_zero_with_backend_output() {
  let env = TestEnv::from_fixture("project");
  env.write_file("registry/B/2.1.toml", FAILING_B);

  env
    .pakt()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("build: compile step of 'B@2.1' failed"))
    .stderr(predicate::str::contains("b.c:3:5: error: unknown type name"));

  assert!(!env.out_path().join("artifacts.json").exists());
}

#[test]
fn unresolvable_constraint_fails_in_resolve_stage() {
  let env = TestEnv::from_fixture("project");
  env.write_file(
    "pakt.toml",
    "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[requires]\nB = \">=3.0\"\n",
  );

  env
    .pakt()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("resolve:"));
}

#[test]
fn custom_out_dir() {
  let env = TestEnv::from_fixture("project");
  let out = env.temp.path().join("elsewhere");

  env.pakt().arg("build").arg("--out").arg(&out).assert().success();

  assert!(out.join("artifacts.json").exists());
  assert!(!env.out_path().exists());
}
