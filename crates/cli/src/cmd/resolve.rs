//! Implementation of the `pakt resolve` command.

use anyhow::Result;

use crate::RecipeArgs;
use crate::cmd::load_pipeline;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_resolve(target: &RecipeArgs, format: OutputFormat) -> Result<()> {
  let pipeline = load_pipeline(target, None, None)?;
  let graph = pipeline.resolve()?;

  if format.is_json() {
    return print_json(&graph);
  }

  print_success(&format!("Resolved {} package(s)", graph.len()));
  for node in graph.dependencies_first() {
    println!();
    print_info(&node.id());
    if let Some(source) = &node.source {
      print_stat("Source", &source.to_string());
    }
    if !node.dependencies.is_empty() {
      let deps = node.dependencies.iter().cloned().collect::<Vec<_>>().join(", ");
      print_stat("Requires", &format!("{} {}", symbols::ARROW, deps));
    }
    for (key, value) in &node.options {
      print_stat(&format!("option {key}"), &value.to_string());
    }
  }

  let link = graph.link_order().iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(" ");
  println!();
  print_stat("Link order", &link);

  let floating: Vec<&str> = graph
    .nodes
    .values()
    .filter(|n| n.source.as_ref().is_some_and(|s| s.is_floating()))
    .map(|n| n.name.as_str())
    .collect();
  if !floating.is_empty() {
    print_warning(&format!("Floating sources, not reproducible: {}", floating.join(", ")));
  }

  Ok(())
}
