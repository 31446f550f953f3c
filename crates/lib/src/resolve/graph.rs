//! The resolved dependency graph and the orders derived from it.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::recipe::{BackendDecl, OptionValue, Options, PackageVersion, Supports};
use crate::source::SourceRef;

/// One package pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedNode {
  pub name: String,
  pub version: PackageVersion,
  pub options: Options,
  /// Names of direct dependencies.
  pub dependencies: BTreeSet<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<SourceRef>,
  pub libs: Vec<String>,
  pub defines: Vec<String>,
  pub supports: Supports,
  #[serde(skip)]
  pub backend: BackendDecl,
}

impl ResolvedNode {
  /// `name@version`.
  pub fn id(&self) -> String {
    format!("{}@{}", self.name, self.version)
  }

  /// Whether the package is built as a shared library.
  ///
  /// Packages are static unless `shared` is set to true.
  pub fn is_shared(&self) -> bool {
    self.options.get("shared").and_then(OptionValue::as_bool).unwrap_or(false)
  }
}

/// A conflict-free dependency DAG with exactly one node per package name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedGraph {
  /// The package being built, when resolved from a recipe.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub root: Option<String>,
  /// Packages required directly by the root.
  pub direct: BTreeSet<String>,
  pub nodes: BTreeMap<String, ResolvedNode>,
}

impl ResolvedGraph {
  pub fn get(&self, name: &str) -> Option<&ResolvedNode> {
    self.nodes.get(name)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn root_node(&self) -> Option<&ResolvedNode> {
    self.root.as_deref().and_then(|name| self.nodes.get(name))
  }

  /// Nodes other than the root.
  pub fn dependencies(&self) -> impl Iterator<Item = &ResolvedNode> {
    self
      .nodes
      .values()
      .filter(move |node| Some(node.name.as_str()) != self.root.as_deref())
  }

  /// Every package reachable from `name`, excluding `name` itself.
  pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = self
      .nodes
      .get(name)
      .map(|node| node.dependencies.iter().map(String::as_str).collect())
      .unwrap_or_default();

    while let Some(current) = stack.pop() {
      if !seen.insert(current.to_string()) {
        continue;
      }
      if let Some(node) = self.nodes.get(current) {
        stack.extend(node.dependencies.iter().map(String::as_str));
      }
    }

    seen.remove(name);
    seen
  }

  /// Nodes ordered so that every dependency precedes its dependents.
  ///
  /// Ties are broken by name, so the order depends only on graph content.
  pub fn dependencies_first(&self) -> Vec<&ResolvedNode> {
    let mut remaining: BTreeMap<&str, usize> = self
      .nodes
      .values()
      .map(|node| {
        let known = node
          .dependencies
          .iter()
          .filter(|dep| self.nodes.contains_key(dep.as_str()))
          .count();
        (node.name.as_str(), known)
      })
      .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in self.nodes.values() {
      for dep in &node.dependencies {
        dependents.entry(dep.as_str()).or_default().push(node.name.as_str());
      }
    }

    let mut ready: BTreeSet<&str> = remaining
      .iter()
      .filter(|(_, count)| **count == 0)
      .map(|(name, _)| *name)
      .collect();
    let mut ordered = Vec::with_capacity(self.nodes.len());

    while let Some(name) = ready.pop_first() {
      remaining.remove(name);
      if let Some(node) = self.nodes.get(name) {
        ordered.push(node);
      }
      for dependent in dependents.get(name).into_iter().flatten() {
        if let Some(count) = remaining.get_mut(dependent) {
          *count = count.saturating_sub(1);
          if *count == 0 {
            ready.insert(*dependent);
          }
        }
      }
    }

    ordered
  }

  /// Nodes ordered so that every dependent precedes its dependencies.
  ///
  /// This is the order static libraries must be handed to a linker.
  pub fn link_order(&self) -> Vec<&ResolvedNode> {
    let mut order = self.dependencies_first();
    order.reverse();
    order
  }

  /// A dependency cycle, if the graph has one, as a closed path of names.
  pub fn find_cycle(&self) -> Option<Vec<String>> {
    let (graph, _) = self.digraph();
    if toposort(&graph, None).is_ok() {
      return None;
    }

    let members: BTreeSet<&str> = tarjan_scc(&graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
      .map(|scc| scc.into_iter().map(|idx| graph[idx]).collect::<BTreeSet<&str>>())
      .min()?;

    let start = members.first()?;
    let mut path: Vec<&str> = Vec::new();
    let mut current = *start;
    loop {
      if let Some(pos) = path.iter().position(|seen| *seen == current) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
        cycle.push(current.to_string());
        return Some(cycle);
      }
      path.push(current);
      current = self
        .nodes
        .get(current)?
        .dependencies
        .iter()
        .map(String::as_str)
        .find(|dep| members.contains(dep))?;
    }
  }

  /// Graph with an edge from every dependency to its dependent.
  fn digraph(&self) -> (DiGraph<&str, ()>, BTreeMap<&str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut indices = BTreeMap::new();

    for name in self.nodes.keys() {
      indices.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    for node in self.nodes.values() {
      let dependent = indices[node.name.as_str()];
      for dep in &node.dependencies {
        if let Some(&dependency) = indices.get(dep.as_str()) {
          graph.add_edge(dependency, dependent, ());
        }
      }
    }

    (graph, indices)
  }
}
