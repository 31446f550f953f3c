//! Implementation of the `pakt fetch` command.
//!
//! Resolves the graph and acquires every source without building, so a
//! later `pakt build` can run offline against the lock file.

use anyhow::Result;

use crate::RecipeArgs;
use crate::cmd::{load_pipeline, runtime};
use crate::output::{print_info, print_stat, print_success, print_warning, truncate_rev};

pub fn cmd_fetch(target: &RecipeArgs) -> Result<()> {
  let pipeline = load_pipeline(target, None, None)?;
  let graph = pipeline.resolve()?;

  let rt = runtime()?;
  let fetched = rt.block_on(pipeline.fetch(&graph))?;

  for warning in &fetched.warnings {
    print_warning(&warning.to_string());
  }

  print_success(&format!("Fetched {} source(s)", fetched.sources.len()));
  for (name, source) in &fetched.sources {
    print_stat(name, &format!("{} {}", truncate_rev(&source.rev), source.path.display()));
  }

  if fetched.lock_updated {
    print_info("Lock file updated");
  }

  Ok(())
}
