mod build;
mod fetch;
mod info;
mod resolve;
mod toolchain;

pub use build::cmd_build;
pub use fetch::cmd_fetch;
pub use info::cmd_info;
pub use resolve::cmd_resolve;
pub use toolchain::cmd_toolchain;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use pakt_lib::layout::OutputLayout;
use pakt_lib::pipeline::{Pipeline, default_out_dir, settings_for};
use pakt_lib::platform::paths::registry_from_env;
use pakt_lib::recipe::Recipe;
use pakt_lib::registry::FsRegistry;
use pakt_lib::settings::BuildMode;

use crate::RecipeArgs;

/// Registry root: the flag, then `PAKT_REGISTRY`, then `<recipe dir>/registry`.
fn registry_root(flag: Option<&Path>, recipe_dir: &Path) -> PathBuf {
  flag
    .map(Path::to_path_buf)
    .or_else(registry_from_env)
    .unwrap_or_else(|| recipe_dir.join("registry"))
}

/// Load the recipe and wire up a pipeline for it.
pub(crate) fn load_pipeline(target: &RecipeArgs, mode: Option<BuildMode>, out: Option<PathBuf>) -> Result<Pipeline> {
  let recipe_path = dunce::canonicalize(&target.recipe)
    .with_context(|| format!("Recipe not found: {}", target.recipe.display()))?;
  let recipe =
    Recipe::load(&recipe_path).with_context(|| format!("Failed to load recipe: {}", recipe_path.display()))?;

  let recipe_dir = recipe.dir.clone().unwrap_or_else(|| PathBuf::from("."));
  let registry = registry_root(target.registry.as_deref(), &recipe_dir);
  let out_dir = out.unwrap_or_else(|| default_out_dir(&recipe_dir));
  let settings = settings_for(&recipe, mode).context("Failed to determine build settings")?;

  debug!(
    recipe = %recipe_path.display(),
    registry = %registry.display(),
    out = %out_dir.display(),
    settings = %settings,
    "loaded recipe"
  );

  Ok(Pipeline::new(
    recipe,
    Arc::new(FsRegistry::new(registry)),
    settings,
    OutputLayout::new(out_dir),
  ))
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

#[cfg(test)]
mod tests {
  use super::*;
  use pakt_lib::platform::paths::REGISTRY_ENV;
  use serial_test::serial;

  #[test]
  #[serial]
  fn registry_flag_wins_over_env() {
    temp_env::with_var(REGISTRY_ENV, Some("/env/registry"), || {
      let root = registry_root(Some(Path::new("/flag/registry")), Path::new("/app"));
      assert_eq!(root, PathBuf::from("/flag/registry"));
    });
  }

  #[test]
  #[serial]
  fn registry_env_wins_over_recipe_dir() {
    temp_env::with_var(REGISTRY_ENV, Some("/env/registry"), || {
      assert_eq!(registry_root(None, Path::new("/app")), PathBuf::from("/env/registry"));
    });
  }

  #[test]
  #[serial]
  fn registry_defaults_next_to_recipe() {
    temp_env::with_var_unset(REGISTRY_ENV, || {
      assert_eq!(registry_root(None, Path::new("/app")), PathBuf::from("/app/registry"));
    });
  }

  #[test]
  fn missing_recipe_is_reported() {
    let target = RecipeArgs {
      recipe: PathBuf::from("/nonexistent/pakt.toml"),
      registry: None,
    };
    let err = load_pipeline(&target, None, None).err().unwrap();
    assert!(err.to_string().contains("Recipe not found"));
  }
}
