use anyhow::Result;

use pakt_lib::platform::paths::{cache_dir, registry_from_env};
use pakt_lib::settings::BuildSettings;

use crate::output::print_stat;

pub fn cmd_info() -> Result<()> {
  println!("System:");
  match BuildSettings::host() {
    Ok(settings) => {
      print_stat("Platform", &settings.platform().to_string());
      print_stat("Compiler", &settings.compiler.to_string());
      print_stat("Build mode", settings.build_mode.as_str());
    }
    Err(e) => print_stat("Platform", &format!("could not detect platform ({e})")),
  }
  print_stat("Cache", &cache_dir().display().to_string());
  match registry_from_env() {
    Some(registry) => print_stat("Registry", &registry.display().to_string()),
    None => print_stat("Registry", "<recipe dir>/registry"),
  }
  Ok(())
}
