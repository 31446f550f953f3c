//! Tests for `pakt toolchain`.

use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn toolchain_writes_files_without_building() {
  let env = TestEnv::from_fixture("project");

  env
    .pakt()
    .arg("toolchain")
    .assert()
    .success()
    .stdout(predicate::str::contains("A@1.2"));

  let generated = env.out_path().join("build/A/pakt");
  let toolchain = std::fs::read_to_string(generated.join("pakt_toolchain.cmake")).unwrap();
  let deps = std::fs::read_to_string(generated.join("pakt_deps.cmake")).unwrap();

  assert!(toolchain.contains("CMAKE_PREFIX_PATH"));
  assert!(deps.contains("set(PAKT_B_FOUND TRUE)"));
  assert!(!env.out_path().join("install").exists());
  assert!(!env.out_path().join("artifacts.json").exists());
}

#[test]
fn unsupported_setting_fails_in_configure_stage() {
  let env = TestEnv::from_fixture("project");
  env.write_file(
    "registry/B/2.1.toml",
    r#"
[package]
name = "B"
version = "2.1"
libs = ["B"]

[source]
path = "../../sources/B-2.1"

[supports]
build_modes = ["release"]
"#,
  );

  env
    .pakt()
    .args(["toolchain", "--mode", "debug"])
    .assert()
    .failure()
    .stderr(predicate::str::contains(
      "configure: 'B@2.1' does not support build_mode 'debug' (supported: release)",
    ));
}
