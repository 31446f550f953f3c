//! Integration tests for pakt-lib against an on-disk registry.

mod common;

#[cfg(unix)]
mod pipeline_tests;
mod resolve_tests;
