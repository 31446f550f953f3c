//! Resolution against `FsRegistry`.

use pakt_lib::recipe::{Constraint, DependencySpec, OptionValue, Options};
use pakt_lib::registry::FsRegistry;
use pakt_lib::resolve::{ResolveError, resolve_specs};

use super::common::RegistryDir;

fn spec(name: &str, constraint: &str) -> DependencySpec {
  DependencySpec::new(name, Constraint::parse(constraint).unwrap())
}

fn diamond() -> RegistryDir {
  let dir = RegistryDir::new();
  dir
    .add("base", "1.0.0", "")
    .add("base", "1.1.0", "")
    .add("left", "1.0.0", "[requires]\nbase = \">=1.0\"\n")
    .add("right", "2.0.0", "[requires]\nbase = \">=1.1\"\n")
    .add("app", "0.1.0", "[requires]\nleft = \"^1\"\nright = \"^2\"\n");
  dir
}

#[test]
fn newest_version_satisfying_every_demand() {
  let dir = diamond();
  let registry = FsRegistry::new(dir.root());

  let graph = resolve_specs(&[spec("app", ">=0.1")], &Options::new(), &registry).unwrap();

  assert_eq!(graph.get("base").unwrap().id(), "base@1.1.0");
  assert_eq!(graph.len(), 4);
}

#[test]
fn permuted_specs_resolve_identically() {
  let dir = diamond();
  let registry = FsRegistry::new(dir.root());

  let forward = resolve_specs(&[spec("left", "^1"), spec("right", "^2")], &Options::new(), &registry).unwrap();
  let backward = resolve_specs(&[spec("right", "^2"), spec("left", "^1")], &Options::new(), &registry).unwrap();

  assert_eq!(
    serde_json::to_string(&forward).unwrap(),
    serde_json::to_string(&backward).unwrap()
  );
}

#[test]
fn diamond_link_order_puts_dependents_first() {
  let dir = diamond();
  let registry = FsRegistry::new(dir.root());

  let graph = resolve_specs(&[spec("app", "*")], &Options::new(), &registry).unwrap();
  let order: Vec<&str> = graph.link_order().iter().map(|n| n.name.as_str()).collect();

  let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
  assert!(position("app") < position("left"));
  assert!(position("app") < position("right"));
  assert!(position("left") < position("base"));
  assert!(position("right") < position("base"));
}

#[test]
fn conflicting_constraints_name_every_demand() {
  let dir = RegistryDir::new();
  dir
    .add("zlib", "1.2.13", "")
    .add("zlib", "1.3.1", "")
    .add("png", "1.6.0", "[requires]\nzlib = \"<1.3\"\n");
  let registry = FsRegistry::new(dir.root());

  let err = resolve_specs(&[spec("png", "*"), spec("zlib", ">=1.3")], &Options::new(), &registry).unwrap_err();

  match err {
    ResolveError::UnresolvableConstraint { name, demands } => {
      assert_eq!(name, "zlib");
      assert_eq!(demands.len(), 2);
    }
    other => panic!("expected UnresolvableConstraint, got {other}"),
  }
}

#[test]
fn root_option_reaches_dependency() {
  let dir = RegistryDir::new();
  dir.add("uv", "1.48.0", "[default_options]\nshared = false\n");
  let registry = FsRegistry::new(dir.root());

  let specs = [spec("uv", "*").with_option("shared", OptionValue::Bool(true))];
  let graph = resolve_specs(&specs, &Options::new(), &registry).unwrap();

  assert!(graph.get("uv").unwrap().is_shared());
}

#[test]
fn missing_package_is_unknown_dependency() {
  let dir = RegistryDir::new();
  std::fs::create_dir_all(dir.root()).unwrap();
  let registry = FsRegistry::new(dir.root());

  let err = resolve_specs(&[spec("nowhere", "*")], &Options::new(), &registry).unwrap_err();
  assert!(matches!(err, ResolveError::UnknownDependency { .. }));
}
