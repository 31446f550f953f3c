//! Dependency resolution.
//!
//! Turns declared dependency specs into a [`ResolvedGraph`] with exactly one
//! version per package name.
//!
//! # Algorithm
//!
//! Resolution is a fixpoint over a map of picks (name to version):
//!
//! 1. Walk the graph breadth-first from the root specs, following the
//!    recipes of the current picks, and collect every demand (constraint plus
//!    the package that declared it) per name.
//! 2. For every demanded name, independently and in parallel, pick the
//!    highest registry version satisfying all of its demands.
//! 3. Repeat until the picks stop changing.
//!
//! Demands are recomputed from scratch each round, so a constraint introduced
//! by a version that is later replaced does not linger. A name that cannot be
//! selected in some round is not an error yet: it keeps its previous pick (or
//! stays unpicked) and the failure is only reported if it survives into the
//! settled round. Every map is ordered, which makes the outcome independent
//! of declaration order and scheduling.

pub mod graph;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, trace};

pub use graph::{ResolvedGraph, ResolvedNode};

use crate::recipe::{Constraint, DependencySpec, OptionValue, Options, PackageVersion, Recipe};
use crate::registry::{Registry, RegistryError};

/// Upper bound on fixpoint rounds before giving up.
pub const MAX_ROUNDS: usize = 64;

/// Label used for demands that come from the caller rather than a recipe.
pub const ROOT_LABEL: &str = "<root>";

type Picks = BTreeMap<String, PackageVersion>;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("unknown dependency '{name}' (required by {required_by}): {detail}")]
  UnknownDependency {
    name: String,
    required_by: String,
    detail: String,
  },

  #[error("no version of '{name}' satisfies all of: {}", .demands.join(", "))]
  UnresolvableConstraint { name: String, demands: Vec<String> },

  #[error("dependency cycle: {}", .cycle.join(" -> "))]
  DependencyCycle { cycle: Vec<String> },

  #[error(
    "conflicting option '{option}' for '{package}': {first_from} sets {first_value}, {second_from} sets {second_value}"
  )]
  ConflictingOptions {
    package: String,
    option: String,
    first_from: String,
    first_value: String,
    second_from: String,
    second_value: String,
  },

  #[error("resolution did not settle after {0} rounds")]
  NotConverged(usize),

  #[error(transparent)]
  Registry(#[from] RegistryError),
}

/// Options the root imposes on the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootOptions {
  /// Applied to every package that declares the option.
  pub global: Options,
  /// Applied to the named package, whether direct or transitive.
  pub packages: BTreeMap<String, Options>,
}

impl RootOptions {
  pub fn from_recipe(recipe: &Recipe) -> Self {
    Self {
      global: recipe.global_options.clone(),
      packages: recipe.dependency_options.clone(),
    }
  }
}

/// One constraint on a package, with where it came from.
#[derive(Debug, Clone)]
struct Demand {
  constraint: Constraint,
  options: Options,
  from: String,
}

impl fmt::Display for Demand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "'{}' (from {})", self.constraint, self.from)
  }
}

/// Resolve a recipe's requirements, with the recipe itself as the root node.
pub fn resolve_recipe(recipe: &Recipe, registry: &dyn Registry) -> Result<ResolvedGraph, ResolveError> {
  let mut session = Session::new(registry, RootOptions::from_recipe(recipe), Some(recipe));
  session.resolve(&recipe.requires)
}

/// Resolve a bare set of dependency specs.
///
/// Each spec's own options are treated as root overrides for that package.
pub fn resolve_specs(
  specs: &[DependencySpec],
  global_options: &Options,
  registry: &dyn Registry,
) -> Result<ResolvedGraph, ResolveError> {
  let mut root = RootOptions {
    global: global_options.clone(),
    packages: BTreeMap::new(),
  };
  for spec in specs {
    root
      .packages
      .entry(spec.name.clone())
      .or_default()
      .extend(spec.options.clone());
  }

  let mut session = Session::new(registry, root, None);
  session.resolve(specs)
}

struct Session<'a> {
  registry: &'a dyn Registry,
  root_options: RootOptions,
  root: Option<&'a Recipe>,
  recipes: BTreeMap<(String, PackageVersion), Recipe>,
}

impl<'a> Session<'a> {
  fn new(registry: &'a dyn Registry, root_options: RootOptions, root: Option<&'a Recipe>) -> Self {
    Self {
      registry,
      root_options,
      root,
      recipes: BTreeMap::new(),
    }
  }

  fn root_label(&self) -> String {
    self.root.map(Recipe::id).unwrap_or_else(|| ROOT_LABEL.to_string())
  }

  fn root_name(&self) -> Option<&str> {
    self.root.map(|r| r.name.as_str())
  }

  fn recipe(&mut self, name: &str, version: &PackageVersion) -> Result<&Recipe, ResolveError> {
    match self.recipes.entry((name.to_string(), version.clone())) {
      Entry::Occupied(entry) => Ok(entry.into_mut()),
      Entry::Vacant(entry) => {
        let recipe = self.registry.recipe(name, version)?;
        Ok(entry.insert(recipe))
      }
    }
  }

  fn resolve(&mut self, specs: &[DependencySpec]) -> Result<ResolvedGraph, ResolveError> {
    info!(count = specs.len(), root = %self.root_label(), "resolving dependencies");

    let mut picks = Picks::new();
    let mut demands = BTreeMap::new();
    let mut settled = false;

    for round in 1..=MAX_ROUNDS {
      demands = self.collect_demands(specs, &picks)?;
      let (mut next, failures) = self.select_all(&demands);
      trace!(round, picks = next.len(), failures = failures.len(), "resolution round");

      // A failed name keeps its previous pick until the picks settle; its
      // demands may still come from a version that is about to be replaced.
      for name in failures.keys() {
        if let Some(previous) = picks.get(name) {
          next.insert(name.clone(), previous.clone());
        }
      }

      if next == picks {
        debug!(rounds = round, "resolution settled");
        if let Some((name, err)) = failures.into_iter().next() {
          debug!(package = %name, "selection failed at fixpoint");
          return Err(err);
        }
        settled = true;
        break;
      }
      picks = next;
    }

    if !settled {
      return Err(ResolveError::NotConverged(MAX_ROUNDS));
    }

    let graph = self.build_graph(specs, &picks, &demands)?;

    if let Some(cycle) = graph.find_cycle() {
      return Err(ResolveError::DependencyCycle { cycle });
    }

    info!(packages = graph.len(), "dependencies resolved");
    Ok(graph)
  }

  /// Breadth-first walk from the root specs through the recipes of `picks`.
  fn collect_demands(
    &mut self,
    specs: &[DependencySpec],
    picks: &BTreeMap<String, PackageVersion>,
  ) -> Result<BTreeMap<String, Vec<Demand>>, ResolveError> {
    let root_label = self.root_label();
    let root_name = self.root_name().map(str::to_string);

    let mut demands: BTreeMap<String, Vec<Demand>> = BTreeMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();

    let mut sorted: Vec<&DependencySpec> = specs.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    for spec in sorted {
      demands.entry(spec.name.clone()).or_default().push(Demand {
        constraint: spec.constraint.clone(),
        options: spec.options.clone(),
        from: root_label.clone(),
      });
      if visited.insert(spec.name.clone()) {
        queue.push_back(spec.name.clone());
      }
    }

    while let Some(name) = queue.pop_front() {
      if root_name.as_deref() == Some(name.as_str()) {
        continue;
      }
      let Some(version) = picks.get(&name) else {
        continue;
      };
      let recipe = self.recipe(&name, version)?;
      let from = recipe.id();
      let requires = recipe.requires.clone();

      for spec in requires {
        demands.entry(spec.name.clone()).or_default().push(Demand {
          constraint: spec.constraint,
          options: spec.options,
          from: from.clone(),
        });
        if visited.insert(spec.name.clone()) {
          queue.push_back(spec.name);
        }
      }
    }

    Ok(demands)
  }

  /// Pick a version for every demanded name.
  ///
  /// Returns the picks that succeeded alongside the per-name failures, keyed
  /// by name so the first one reported is deterministic.
  fn select_all(&self, demands: &BTreeMap<String, Vec<Demand>>) -> (Picks, BTreeMap<String, ResolveError>) {
    let root_name = self.root_name();
    let registry = self.registry;

    let candidates: Vec<(&String, &Vec<Demand>)> = demands
      .iter()
      .filter(|(name, _)| Some(name.as_str()) != root_name)
      .collect();

    let selected: Vec<(String, Result<PackageVersion, ResolveError>)> = candidates
      .par_iter()
      .map(|(name, demands)| ((*name).clone(), select(registry, name, demands)))
      .collect();

    let mut picks = Picks::new();
    let mut failures = BTreeMap::new();
    for (name, result) in selected {
      match result {
        Ok(version) => {
          picks.insert(name, version);
        }
        Err(err) => {
          failures.insert(name, err);
        }
      }
    }
    (picks, failures)
  }

  fn build_graph(
    &mut self,
    specs: &[DependencySpec],
    picks: &BTreeMap<String, PackageVersion>,
    demands: &BTreeMap<String, Vec<Demand>>,
  ) -> Result<ResolvedGraph, ResolveError> {
    let root_label = self.root_label();
    let mut nodes = BTreeMap::new();

    for (name, version) in picks {
      let recipe = self.recipe(name, version)?.clone();
      let options = self.merge_options(&recipe, demands.get(name).map(Vec::as_slice).unwrap_or(&[]), &root_label)?;
      nodes.insert(name.clone(), node_from_recipe(recipe, options));
    }

    let direct: BTreeSet<String> = specs.iter().map(|spec| spec.name.clone()).collect();

    let root = match self.root {
      Some(recipe) => {
        let mut options = recipe.default_options.clone();
        for (key, value) in &self.root_options.global {
          if options.contains_key(key) {
            options.insert(key.clone(), value.clone());
          }
        }
        nodes.insert(recipe.name.clone(), node_from_recipe(recipe.clone(), options));
        Some(recipe.name.clone())
      }
      None => None,
    };

    Ok(ResolvedGraph { root, direct, nodes })
  }

  /// Layer options: package defaults, transitive specs, root `*`, root per-package.
  fn merge_options(&self, recipe: &Recipe, demands: &[Demand], root_label: &str) -> Result<Options, ResolveError> {
    let mut options = recipe.default_options.clone();

    let mut transitive: BTreeMap<&str, (&str, &OptionValue)> = BTreeMap::new();
    for demand in demands.iter().filter(|d| d.from != root_label) {
      for (key, value) in &demand.options {
        match transitive.get(key.as_str()) {
          Some((first_from, first_value)) if *first_value != value => {
            return Err(ResolveError::ConflictingOptions {
              package: recipe.name.clone(),
              option: key.clone(),
              first_from: first_from.to_string(),
              first_value: first_value.to_string(),
              second_from: demand.from.clone(),
              second_value: value.to_string(),
            });
          }
          Some(_) => {}
          None => {
            transitive.insert(key.as_str(), (demand.from.as_str(), value));
          }
        }
      }
    }
    for (key, (_, value)) in transitive {
      options.insert(key.to_string(), value.clone());
    }

    for (key, value) in &self.root_options.global {
      if options.contains_key(key) {
        options.insert(key.clone(), value.clone());
      }
    }

    if let Some(overrides) = self.root_options.packages.get(&recipe.name) {
      options.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    Ok(options)
  }
}

/// Highest registry version satisfying every demand on `name`.
fn select(registry: &dyn Registry, name: &str, demands: &[Demand]) -> Result<PackageVersion, ResolveError> {
  let required_by = || {
    demands
      .iter()
      .map(|d| d.from.as_str())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect::<Vec<_>>()
      .join(", ")
  };

  let Some(versions) = registry.versions(name)? else {
    return Err(ResolveError::UnknownDependency {
      name: name.to_string(),
      required_by: required_by(),
      detail: "not in the registry".to_string(),
    });
  };

  for demand in demands {
    if !versions.iter().any(|v| demand.constraint.matches(v)) {
      let available: Vec<String> = versions.iter().map(ToString::to_string).collect();
      return Err(ResolveError::UnknownDependency {
        name: name.to_string(),
        required_by: demand.from.clone(),
        detail: format!(
          "no version matches '{}' (available: {})",
          demand.constraint,
          if available.is_empty() {
            "none".to_string()
          } else {
            available.join(", ")
          }
        ),
      });
    }
  }

  versions
    .iter()
    .filter(|v| demands.iter().all(|d| d.constraint.matches(v)))
    .max()
    .cloned()
    .ok_or_else(|| ResolveError::UnresolvableConstraint {
      name: name.to_string(),
      demands: demands.iter().map(ToString::to_string).collect(),
    })
}

fn node_from_recipe(recipe: Recipe, options: Options) -> ResolvedNode {
  ResolvedNode {
    dependencies: recipe.requires.iter().map(|spec| spec.name.clone()).collect(),
    name: recipe.name,
    version: recipe.version,
    options,
    source: recipe.source,
    libs: recipe.libs,
    defines: recipe.defines,
    supports: recipe.supports,
    backend: recipe.backend,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::MemoryRegistry;

  fn registry(recipes: &[&str]) -> MemoryRegistry {
    let mut registry = MemoryRegistry::new();
    for recipe in recipes {
      registry.insert_toml(recipe).unwrap();
    }
    registry
  }

  fn pkg(name: &str, version: &str, extra: &str) -> String {
    format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\nlibs = [\"{name}\"]\n{extra}")
  }

  fn spec(name: &str, constraint: &str) -> DependencySpec {
    DependencySpec::new(name, Constraint::parse(constraint).unwrap())
  }

  fn versions(graph: &ResolvedGraph) -> Vec<String> {
    graph.nodes.values().map(ResolvedNode::id).collect()
  }

  fn ab_registry() -> MemoryRegistry {
    let recipes = [
      pkg("A", "1.0", "[requires]\nB = \">=2.0\"\n"),
      pkg("A", "1.2", "[requires]\nB = \">=2.0\"\n"),
      pkg("B", "1.9", ""),
      pkg("B", "2.0", ""),
      pkg("B", "2.1", ""),
    ];
    registry(&recipes.iter().map(String::as_str).collect::<Vec<_>>())
  }

  mod selection {
    use super::*;

    #[test]
    fn highest_satisfying_versions() {
      let registry = ab_registry();
      let graph = resolve_specs(&[spec("A", ">=1.0"), spec("B", ">=2.0")], &Options::new(), &registry).unwrap();

      assert_eq!(versions(&graph), vec!["A@1.2", "B@2.1"]);
      assert_eq!(graph.get("A").unwrap().dependencies, BTreeSet::from(["B".to_string()]));
    }

    #[test]
    fn transitive_constraint_narrows_choice() {
      let registry = registry(&[
        &pkg("A", "1.0", "[requires]\nB = \"<2.1\"\n"),
        &pkg("B", "2.0", ""),
        &pkg("B", "2.1", ""),
      ]);
      let graph = resolve_specs(&[spec("A", "*"), spec("B", ">=2.0")], &Options::new(), &registry).unwrap();

      assert_eq!(graph.get("B").unwrap().version.to_string(), "2.0");
    }

    #[test]
    fn stale_demands_are_dropped() {
      // A@2 requires C, A@1 does not; capping A at 1 must not pull C in.
      let registry = registry(&[
        &pkg("A", "1.0", ""),
        &pkg("A", "2.0", "[requires]\nC = \"*\"\n"),
        &pkg("B", "1.0", "[requires]\nA = \"<2\"\n"),
        &pkg("C", "1.0", ""),
      ]);
      let graph = resolve_specs(&[spec("A", "*"), spec("B", "*")], &Options::new(), &registry).unwrap();

      assert_eq!(versions(&graph), vec!["A@1.0", "B@1.0"]);
    }

    #[test]
    fn transient_missing_dependency_is_dropped() {
      // Only A@2 requires C, and C is not in the registry at all.
      let registry = registry(&[
        &pkg("A", "1.0", ""),
        &pkg("A", "2.0", "[requires]\nC = \"*\"\n"),
        &pkg("B", "1.0", "[requires]\nA = \"<2\"\n"),
      ]);
      let graph = resolve_specs(&[spec("A", "*"), spec("B", "*")], &Options::new(), &registry).unwrap();

      assert_eq!(versions(&graph), vec!["A@1.0", "B@1.0"]);
    }

    #[test]
    fn superseded_conflicting_constraint_is_dropped() {
      // A@2 and B disagree about C, but B also caps A below 2.
      let registry = registry(&[
        &pkg("A", "1.0", ""),
        &pkg("A", "2.0", "[requires]\nC = \"<2.0\"\n"),
        &pkg("B", "1.0", "[requires]\nA = \"<2\"\nC = \">=2.0\"\n"),
        &pkg("C", "1.5", ""),
        &pkg("C", "2.5", ""),
      ]);
      let graph = resolve_specs(&[spec("A", "*"), spec("B", "*")], &Options::new(), &registry).unwrap();

      assert_eq!(versions(&graph), vec!["A@1.0", "B@1.0", "C@2.5"]);
    }

    #[test]
    fn duplicate_specs_merge_constraints() {
      let registry = ab_registry();
      let graph = resolve_specs(&[spec("B", ">=1.0"), spec("B", "<2.1")], &Options::new(), &registry).unwrap();
      assert_eq!(versions(&graph), vec!["B@2.0"]);
    }
  }

  mod errors {
    use super::*;

    #[test]
    fn absent_dependency_is_unknown() {
      let registry = ab_registry();
      let result = resolve_specs(&[spec("Z", "*")], &Options::new(), &registry);
      assert!(matches!(result, Err(ResolveError::UnknownDependency { name, .. }) if name == "Z"));
    }

    #[test]
    fn unsatisfiable_single_constraint_is_unknown() {
      let registry = ab_registry();
      let result = resolve_specs(&[spec("B", ">=9")], &Options::new(), &registry);
      assert!(matches!(result, Err(ResolveError::UnknownDependency { name, .. }) if name == "B"));
    }

    #[test]
    fn disjoint_constraints_are_unresolvable() {
      let registry = registry(&[
        &pkg("A", "1.0", "[requires]\nC = \"<2.0\"\n"),
        &pkg("B", "1.0", "[requires]\nC = \">=2.0\"\n"),
        &pkg("C", "1.5", ""),
        &pkg("C", "2.5", ""),
      ]);
      let result = resolve_specs(&[spec("A", "*"), spec("B", "*")], &Options::new(), &registry);

      let Err(ResolveError::UnresolvableConstraint { name, demands }) = result else {
        panic!("expected UnresolvableConstraint, got {result:?}");
      };
      assert_eq!(name, "C");
      assert_eq!(demands.len(), 2);
      assert!(demands.iter().any(|d| d.contains("A@1.0")));
      assert!(demands.iter().any(|d| d.contains("B@1.0")));
    }

    #[test]
    fn cycle_is_reported() {
      let registry = registry(&[
        &pkg("A", "1.0", "[requires]\nB = \"*\"\n"),
        &pkg("B", "1.0", "[requires]\nA = \"*\"\n"),
      ]);
      let result = resolve_specs(&[spec("A", "*")], &Options::new(), &registry);

      let Err(ResolveError::DependencyCycle { cycle }) = result else {
        panic!("expected DependencyCycle, got {result:?}");
      };
      assert_eq!(cycle, vec!["A", "B", "A"]);
    }

    #[test]
    fn cycle_through_root_is_reported() {
      let registry = registry(&[&pkg("A", "1.0", "[requires]\napp = \"*\"\n")]);
      let root = Recipe::parse(&pkg("app", "0.1", "[requires]\nA = \"*\"\n")).unwrap();

      let result = resolve_recipe(&root, &registry);
      assert!(matches!(result, Err(ResolveError::DependencyCycle { .. })));
    }

    #[test]
    fn transitive_option_disagreement_conflicts() {
      let registry = registry(&[
        &pkg("A", "1.0", "[requires]\nC = \"*\"\n[options.C]\nshared = true\n"),
        &pkg("B", "1.0", "[requires]\nC = \"*\"\n[options.C]\nshared = false\n"),
        &pkg("C", "1.0", "[default_options]\nshared = false\n"),
      ]);
      let result = resolve_specs(&[spec("A", "*"), spec("B", "*")], &Options::new(), &registry);

      let Err(ResolveError::ConflictingOptions { package, option, .. }) = result else {
        panic!("expected ConflictingOptions, got {result:?}");
      };
      assert_eq!(package, "C");
      assert_eq!(option, "shared");
    }
  }

  mod options {
    use super::*;

    fn registry_with_options() -> MemoryRegistry {
      registry(&[
        &pkg("A", "1.0", "[requires]\nB = \"*\"\n[options.B]\nshared = true\n"),
        &pkg("B", "1.0", "[default_options]\nshared = false\nfpic = false\n"),
      ])
    }

    #[test]
    fn defaults_then_transitive() {
      let registry = registry_with_options();
      let graph = resolve_specs(&[spec("A", "*")], &Options::new(), &registry).unwrap();

      let b = graph.get("B").unwrap();
      assert_eq!(b.options.get("shared"), Some(&OptionValue::Bool(true)));
      assert_eq!(b.options.get("fpic"), Some(&OptionValue::Bool(false)));
    }

    #[test]
    fn root_overrides_transitive() {
      let registry = registry_with_options();
      let root = Recipe::parse(&pkg(
        "app",
        "0.1",
        "[requires]\nA = \"*\"\n[options.B]\nshared = false\n[options.\"*\"]\nfpic = true\nunused = 1\n",
      ))
      .unwrap();

      let graph = resolve_recipe(&root, &registry).unwrap();

      let b = graph.get("B").unwrap();
      assert_eq!(b.options.get("shared"), Some(&OptionValue::Bool(false)));
      assert_eq!(b.options.get("fpic"), Some(&OptionValue::Bool(true)));
      assert!(!b.options.contains_key("unused"));
      assert!(!graph.get("A").unwrap().options.contains_key("fpic"));
    }
  }

  mod root {
    use super::*;

    #[test]
    fn recipe_becomes_root_node() {
      let registry = ab_registry();
      let root = Recipe::parse(&pkg("app", "0.1", "[requires]\nA = \">=1.0\"\nB = \">=2.0\"\n")).unwrap();

      let graph = resolve_recipe(&root, &registry).unwrap();

      assert_eq!(graph.root.as_deref(), Some("app"));
      assert_eq!(graph.direct, BTreeSet::from(["A".to_string(), "B".to_string()]));
      assert_eq!(versions(&graph), vec!["A@1.2", "B@2.1", "app@0.1"]);
      let order: Vec<_> = graph.link_order().iter().map(|n| n.name.clone()).collect();
      assert_eq!(order, vec!["app", "A", "B"]);
    }
  }

  mod determinism {
    use super::*;

    #[test]
    fn permuted_input_serializes_identically() {
      let registry = ab_registry();
      let forward = resolve_specs(&[spec("A", ">=1.0"), spec("B", ">=2.0")], &Options::new(), &registry).unwrap();

      for _ in 0..10 {
        let reversed =
          resolve_specs(&[spec("B", ">=2.0"), spec("A", ">=1.0")], &Options::new(), &registry).unwrap();
        assert_eq!(
          serde_json::to_string(&forward).unwrap(),
          serde_json::to_string(&reversed).unwrap()
        );
      }
    }
  }
}
