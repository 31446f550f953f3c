//! Full pipeline runs against an on-disk registry with shell backends.

use std::sync::Arc;

use pakt_lib::layout::OutputLayout;
use pakt_lib::package::ArtifactSet;
use pakt_lib::pipeline::{Pipeline, PipelineError, Stage, settings_for};
use pakt_lib::recipe::Recipe;
use pakt_lib::registry::FsRegistry;
use pakt_lib::settings::BuildMode;
use pakt_lib::source::{Acquirer, LockFile};

use super::common::{RegistryDir, read};

const APP: &str = r#"
[package]
name = "app"
version = "0.1.0"

[requires]
A = ">=1.0"
B = ">=2.0"
"#;

fn registry() -> RegistryDir {
  let dir = RegistryDir::new();
  dir
    .add_shell("A", "1.0", "")
    .add_shell("A", "1.2", "B = \">=2.0\"")
    .add_shell("B", "2.0", "")
    .add_shell("B", "2.1", "");
  dir
}

fn pipeline(dir: &RegistryDir, root: &str, mode: Option<BuildMode>) -> Pipeline {
  let recipe = Recipe::load(&dir.root_recipe(root)).unwrap();
  let settings = settings_for(&recipe, mode).unwrap();
  Pipeline::new(
    recipe,
    Arc::new(FsRegistry::new(dir.root())),
    settings,
    OutputLayout::new(dir.path("out")),
  )
  .with_acquirer(Acquirer::new(dir.path("cache")))
}

#[tokio::test]
async fn builds_and_publishes_in_link_order() {
  let dir = registry();
  let pipeline = pipeline(&dir, APP, None);

  let outcome = pipeline.run().await.unwrap();

  assert_eq!(outcome.artifacts.libs, vec!["A", "B"]);
  assert_eq!(outcome.artifacts.package.as_deref(), Some("app"));
  assert!(outcome.warnings.is_empty());

  let on_disk = ArtifactSet::load(&pipeline.layout().artifacts_path()).unwrap();
  assert_eq!(on_disk, outcome.artifacts);

  // A sees B's prefix through its generated dependency file.
  let deps = read(&pipeline.layout().deps_path("A"));
  assert!(deps.contains(&pipeline.layout().prefix("B").display().to_string()));
}

#[tokio::test]
async fn repeated_runs_are_identical() {
  let dir = registry();

  let first = pipeline(&dir, APP, None).run().await.unwrap();
  let lock_after_first = read(&dir.path("app/pakt.lock"));
  let second = pipeline(&dir, APP, None).run().await.unwrap();

  assert_eq!(first.artifacts, second.artifacts);
  assert_eq!(read(&dir.path("app/pakt.lock")), lock_after_first);
}

#[tokio::test]
async fn lock_records_resolved_versions() {
  let dir = registry();
  pipeline(&dir, APP, None).run().await.unwrap();

  let lock = LockFile::load(&dir.path("app/pakt.lock")).unwrap().unwrap();
  assert_eq!(lock.packages["A"].version, "1.2");
  assert_eq!(lock.packages["B"].version, "2.1");
  assert!(!lock.packages.contains_key("app"));
}

#[tokio::test]
async fn lock_file_can_be_disabled() {
  let dir = registry();
  pipeline(&dir, APP, None).with_lock_path(None).run().await.unwrap();
  assert!(!dir.path("app/pakt.lock").exists());
}

#[tokio::test]
async fn debug_mode_reaches_the_artifact_set() {
  let dir = registry();
  let outcome = pipeline(&dir, APP, Some(BuildMode::Debug)).run().await.unwrap();
  assert_eq!(outcome.artifacts.build_mode, BuildMode::Debug);
}

#[tokio::test]
async fn explicit_link_order_is_published_as_written() {
  let dir = registry();
  let root = format!("{APP}\n[link]\norder = \"explicit\"\nlibs = [\"A\", \"B\"]\n");

  let outcome = pipeline(&dir, &root, None).run().await.unwrap();
  assert_eq!(outcome.artifacts.libs, vec!["A", "B"]);
}

#[tokio::test]
async fn explicit_link_order_naming_unknown_library_fails() {
  let dir = registry();
  let root = format!("{APP}\n[link]\norder = \"explicit\"\nlibs = [\"A\", \"C\"]\n");

  let err = pipeline(&dir, &root, None).run().await.unwrap_err();
  assert!(matches!(err, PipelineError::Package(_)));
  assert_eq!(err.stage(), Stage::Package);
}

#[tokio::test]
async fn missing_source_tree_stops_before_build() {
  let dir = registry();
  std::fs::remove_dir_all(dir.path("sources/B-2.1")).unwrap();
  let pipeline = pipeline(&dir, APP, None);

  let err = pipeline.run().await.unwrap_err();

  assert_eq!(err.stage(), Stage::Fetch);
  assert!(!pipeline.layout().build_dir("B").exists());
}
