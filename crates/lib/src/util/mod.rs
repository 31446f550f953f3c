//! Shared utilities.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;
