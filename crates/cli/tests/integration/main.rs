//! CLI integration tests.
//!
//! Fixture projects build with `/bin/sh` backends, so these only run on Unix.

#![cfg(unix)]

mod common;

mod build_tests;
mod fetch_tests;
mod resolve_tests;
mod toolchain_tests;
