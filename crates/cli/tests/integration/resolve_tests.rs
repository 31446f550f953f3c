//! Tests for `pakt resolve`.

use predicates::prelude::*;
use serde_json::Value;

use crate::common::TestEnv;

#[test]
fn resolve_prints_versions_and_link_order() {
  let env = TestEnv::from_fixture("project");

  env
    .pakt()
    .arg("resolve")
    .assert()
    .success()
    .stdout(predicate::str::contains("A@1.2"))
    .stdout(predicate::str::contains("B@2.1"))
    .stdout(predicate::str::contains("app A B"));
}

#[test]
fn resolve_json_is_stable_across_runs() {
  let env = TestEnv::from_fixture("project");

  let first = env.pakt().args(["resolve", "--format", "json"]).output().unwrap();
  let second = env.pakt().args(["resolve", "--format", "json"]).output().unwrap();

  assert!(first.status.success());
  assert_eq!(first.stdout, second.stdout);

  let graph: Value = serde_json::from_slice(&first.stdout).unwrap();
  assert_eq!(graph["nodes"]["A"]["version"], "1.2");
  assert_eq!(graph["nodes"]["A"]["dependencies"], serde_json::json!(["B"]));
}

#[test]
fn registry_flag_points_elsewhere() {
  let env = TestEnv::from_fixture("project");
  let registry = env.project().join("registry");
  std::fs::rename(&registry, env.temp.path().join("shared-registry")).unwrap();

  env.pakt().arg("resolve").assert().failure();

  env
    .pakt()
    .arg("resolve")
    .arg("--registry")
    .arg(env.temp.path().join("shared-registry"))
    .assert()
    .success()
    .stdout(predicate::str::contains("B@2.1"));
}

#[test]
fn unknown_dependency_fails() {
  let env = TestEnv::from_fixture("project");
  env.write_file(
    "pakt.toml",
    "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[requires]\nzlib = \">=1.0\"\n",
  );

  env
    .pakt()
    .arg("resolve")
    .assert()
    .failure()
    .stderr(predicate::str::contains("zlib"));
}
