//! Tests for `pakt fetch`.

use predicates::prelude::*;
use serde_json::Value;

use crate::common::TestEnv;

#[test]
fn fetch_writes_lock_file() {
  let env = TestEnv::from_fixture("project");

  env
    .pakt()
    .arg("fetch")
    .assert()
    .success()
    .stdout(predicate::str::contains("Fetched 2 source(s)"))
    .stdout(predicate::str::contains("Lock file updated"));

  let lock: Value = serde_json::from_str(&std::fs::read_to_string(env.project().join("pakt.lock")).unwrap()).unwrap();
  assert_eq!(lock["packages"]["A"]["version"], "1.2");
  assert_eq!(lock["packages"]["B"]["rev"], "local");
}

#[test]
fn second_fetch_leaves_lock_alone() {
  let env = TestEnv::from_fixture("project");

  env.pakt().arg("fetch").assert().success();
  env
    .pakt()
    .arg("fetch")
    .assert()
    .success()
    .stdout(predicate::str::contains("Lock file updated").not());
}

#[test]
fn missing_path_source_fails_in_fetch_stage() {
  let env = TestEnv::from_fixture("project");
  std::fs::remove_dir_all(env.project().join("sources/B-2.1")).unwrap();

  env
    .pakt()
    .arg("fetch")
    .assert()
    .failure()
    .stderr(predicate::str::contains("fetch:"));
}
