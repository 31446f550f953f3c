//! Implementation of the `pakt toolchain` command.
//!
//! Writes the toolchain and dependency files each package would be configured
//! with, for inspection or for driving CMake by hand.

use std::path::PathBuf;

use anyhow::Result;

use pakt_lib::pipeline::PipelineError;
use pakt_lib::settings::BuildMode;
use pakt_lib::toolchain;

use crate::RecipeArgs;
use crate::cmd::load_pipeline;
use crate::output::{print_info, print_stat, print_success};

pub fn cmd_toolchain(target: &RecipeArgs, mode: Option<BuildMode>, out: Option<PathBuf>) -> Result<()> {
  let pipeline = load_pipeline(target, mode, out)?;
  let graph = pipeline.resolve()?;
  let settings = pipeline.settings();

  toolchain::check_compatible(&graph, settings).map_err(PipelineError::from)?;

  let mut written = Vec::new();
  for node in graph.nodes.values().filter(|n| n.source.is_some()) {
    let files = toolchain::generate(&graph, &node.name, settings, pipeline.layout()).map_err(PipelineError::from)?;
    written.push((node.id(), files));
  }

  if written.is_empty() {
    print_info("No package with a source; nothing to configure");
    return Ok(());
  }

  print_success(&format!("Generated toolchains for {}", settings));
  for (id, files) in &written {
    print_stat(id, &files.toolchain.display().to_string());
  }

  Ok(())
}
