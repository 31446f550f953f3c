//! Implementation of the `pakt build` command.
//!
//! Runs the whole pipeline for a recipe. Ctrl-C stops a clone or fetch in
//! progress and cancels the running backend step, process group included.
//! The command then exits non-zero.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use tracing::warn;

use pakt_lib::build::cancellation;
use pakt_lib::settings::BuildMode;
use pakt_lib::source::fetch;

use crate::RecipeArgs;
use crate::cmd::{load_pipeline, runtime};
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success};

pub fn cmd_build(target: &RecipeArgs, mode: Option<BuildMode>, out: Option<PathBuf>, format: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let (handle, token) = cancellation();
  let pipeline = load_pipeline(target, mode, out)?.with_cancel(token);

  let rt = runtime()?;
  let outcome = rt.block_on(async {
    let interrupt = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling build");
        fetch::interrupt();
        handle.cancel();
      }
    });
    let result = pipeline.run().await;
    interrupt.abort();
    result
  })?;

  if format.is_json() {
    return print_json(&outcome.artifacts);
  }

  let built = outcome.built.iter().filter(|p| !p.skipped).count();
  let title = match outcome.graph.root_node() {
    Some(root) => format!("Built {}", root.id()),
    None => "Build complete".to_string(),
  };
  print_success(&title);
  print_stat("Mode", outcome.artifacts.build_mode.as_str());
  print_stat("Packages built", &built.to_string());
  print_stat("Libraries", &outcome.artifacts.libs.join(" "));
  for dir in &outcome.artifacts.include_dirs {
    print_stat("Include", &dir.display().to_string());
  }
  print_stat("Artifacts", &pipeline.layout().artifacts_path().display().to_string());
  print_stat("Duration", &format_duration(start.elapsed()));

  Ok(())
}
