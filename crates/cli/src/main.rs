mod cmd;
mod output;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use pakt_lib::consts::RECIPE_FILENAME;
use pakt_lib::settings::BuildMode;

use cmd::{cmd_build, cmd_fetch, cmd_info, cmd_resolve, cmd_toolchain};
use output::{OutputFormat, print_error, render_error};

/// pakt - dependency-aware build orchestrator
#[derive(Parser)]
#[command(name = "pakt")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Log filter such as `info` or `pakt_lib=trace` (overrides RUST_LOG)
  #[arg(long, global = true, value_name = "FILTER")]
  log_level: Option<String>,

  /// When to use colored output
  #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
  color: ColorChoice,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
  Auto,
  Always,
  Never,
}

/// Which recipe to load and where its dependencies come from.
#[derive(Debug, Clone, Args)]
pub struct RecipeArgs {
  /// Path to the recipe
  #[arg(default_value = RECIPE_FILENAME)]
  pub recipe: PathBuf,

  /// Recipe registry directory (default: $PAKT_REGISTRY, then <recipe dir>/registry)
  #[arg(long, value_name = "DIR")]
  pub registry: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve, fetch, configure, build and package a recipe
  Build {
    #[command(flatten)]
    target: RecipeArgs,

    /// Build mode (debug or release), overriding the recipe's settings
    #[arg(long, value_name = "MODE")]
    mode: Option<BuildMode>,

    /// Output directory (default: <recipe dir>/pakt-out)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Print the resolved dependency graph
  Resolve {
    #[command(flatten)]
    target: RecipeArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Acquire every source in the graph and update the lock file
  Fetch {
    #[command(flatten)]
    target: RecipeArgs,
  },

  /// Write toolchain and dependency files without building
  Toolchain {
    #[command(flatten)]
    target: RecipeArgs,

    /// Build mode (debug or release), overriding the recipe's settings
    #[arg(long, value_name = "MODE")]
    mode: Option<BuildMode>,

    /// Output directory (default: <recipe dir>/pakt-out)
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
  },

  /// Show host platform and default settings
  Info,
}

fn init_logging(cli: &Cli) {
  let filter = match (&cli.log_level, cli.verbose) {
    (Some(level), _) => EnvFilter::new(level),
    (None, true) => EnvFilter::new("debug"),
    (None, false) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
  };

  let ansi = match cli.color {
    ColorChoice::Always => true,
    ColorChoice::Never => false,
    ColorChoice::Auto => std::io::stderr().is_terminal(),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_ansi(ansi)
    .without_time()
    .init();
}

fn apply_color(choice: ColorChoice) {
  match choice {
    ColorChoice::Always => owo_colors::set_override(true),
    ColorChoice::Never => owo_colors::set_override(false),
    ColorChoice::Auto => {}
  }
}

fn run(cli: Cli) -> Result<()> {
  match cli.command {
    Commands::Build {
      target,
      mode,
      out,
      format,
    } => cmd_build(&target, mode, out, format),
    Commands::Resolve { target, format } => cmd_resolve(&target, format),
    Commands::Fetch { target } => cmd_fetch(&target),
    Commands::Toolchain { target, mode, out } => cmd_toolchain(&target, mode, out),
    Commands::Info => cmd_info(),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(&cli);
  apply_color(cli.color);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error(&render_error(&err));
      ExitCode::FAILURE
    }
  }
}
