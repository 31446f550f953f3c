//! pakt-lib: dependency-aware build orchestration
//!
//! The pipeline stages, leaves first:
//! - [`resolve`]: declared dependency specs to a conflict-free graph
//! - [`source`]: materialized source trees, with floating references flagged
//! - [`toolchain`]: CMake toolchain and dependency descriptions
//! - [`build`]: backend configure, compile and install steps
//! - [`package`]: the published artifact set with explicit link order
//!
//! [`pipeline`] runs them in order for a [`recipe::Recipe`].

pub mod build;
pub mod consts;
pub mod layout;
pub mod package;
pub mod pipeline;
pub mod placeholder;
pub mod platform;
pub mod recipe;
pub mod registry;
pub mod resolve;
pub mod settings;
pub mod source;
pub mod toolchain;
pub mod util;
