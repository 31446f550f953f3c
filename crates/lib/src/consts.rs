/// Application name used for cache, data and config directories.
pub const APP_NAME: &str = "pakt";

/// Default recipe file name.
pub const RECIPE_FILENAME: &str = "pakt.toml";

/// Lock file name, stored next to the recipe.
pub const LOCK_FILENAME: &str = "pakt.lock";

/// Artifact metadata file name, written into the output directory.
pub const ARTIFACTS_FILENAME: &str = "artifacts.json";

/// Generated CMake toolchain file name.
pub const TOOLCHAIN_FILENAME: &str = "pakt_toolchain.cmake";

/// Generated dependency description file name.
pub const DEPS_FILENAME: &str = "pakt_deps.cmake";

/// Marker written into a materialized source tree once it is complete.
pub const SOURCE_COMPLETE_MARKER: &str = ".pakt-complete";

/// Number of attempts for transient network fetches.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Base delay between fetch attempts, doubled after every failure.
pub const FETCH_BACKOFF_BASE_MS: u64 = 500;

/// Length of the commit prefix used in source directory names.
pub const SHORT_REV_LEN: usize = 12;
