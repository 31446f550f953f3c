//! Placeholder parsing and substitution for backend command lines.
//!
//! Backend argument templates reference directories that are only known once
//! a package is about to be built. This module parses those templates and
//! substitutes the concrete values.
//!
//! # Placeholder Formats
//!
//! - `$${source}` - the materialized source tree
//! - `$${build}` - the package's build directory
//! - `$${prefix}` - the package's install prefix
//! - `$${toolchain}` - the generated toolchain file
//! - `$${deps}` - the generated dependency description file
//! - `$${mode}` - the backend build type (`Release` / `Debug`)
//! - `$${package}` - the package name
//! - `$${dep:<name>}` - install prefix of a dependency
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$$$` before `{` to produce a literal `$${` sequence.
//!
//! # Example
//!
//! ```
//! use pakt_lib::placeholder::{parse, Segment, Placeholder, Var};
//!
//! let segments = parse("-DCMAKE_TOOLCHAIN_FILE=$${toolchain}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("-DCMAKE_TOOLCHAIN_FILE=".to_string()),
//!     Segment::Placeholder(Placeholder::Var(Var::Toolchain)),
//! ]);
//! ```

use thiserror::Error;

/// A directory or value known at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
  Source,
  Build,
  Prefix,
  Toolchain,
  Deps,
  Mode,
  Package,
}

impl Var {
  fn from_name(name: &str) -> Option<Self> {
    match name {
      "source" => Some(Self::Source),
      "build" => Some(Self::Build),
      "prefix" => Some(Self::Prefix),
      "toolchain" => Some(Self::Toolchain),
      "deps" => Some(Self::Deps),
      "mode" => Some(Self::Mode),
      "package" => Some(Self::Package),
      _ => None,
    }
  }
}

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `$${source}`, `$${build}`, ...
  Var(Var),

  /// `$${dep:<name>}` - install prefix of a dependency
  Dep(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A placeholder to be resolved
  Placeholder(Placeholder),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("'{0}' is not a dependency of this package")]
  UnresolvedDep(String),
}

/// Supplies values for placeholders during substitution.
pub trait Resolver {
  fn resolve_var(&self, var: Var) -> Result<&str, PlaceholderError>;

  fn resolve_dep(&self, name: &str) -> Result<&str, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed or names an unknown value.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();

        match chars.peek() {
          Some((_, '$')) => {
            chars.next();
            if let Some((_, '{')) = chars.peek() {
              // $$${ -> literal $${
              literal.push_str("$${");
              chars.next();
            } else {
              literal.push_str("$$$");
            }
          }
          Some((_, '{')) => {
            chars.next();

            if !literal.is_empty() {
              segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut content = String::new();
            let mut found_close = false;
            for (_, c) in chars.by_ref() {
              if c == '}' {
                found_close = true;
                break;
              }
              content.push(c);
            }

            if !found_close {
              return Err(PlaceholderError::Unclosed(pos));
            }

            segments.push(Segment::Placeholder(parse_placeholder_content(&content)?));
          }
          _ => literal.push_str("$$"),
        }
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  if let Some(var) = Var::from_name(content) {
    return Ok(Placeholder::Var(var));
  }

  match content.split_once(':') {
    Some(("dep", name)) if !name.is_empty() => Ok(Placeholder::Dep(name.to_string())),
    Some(("dep", _)) => Err(PlaceholderError::Malformed(format!("dependency name missing in '{content}'"))),
    _ => Err(PlaceholderError::Unknown(content.to_string())),
  }
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  let mut result = String::new();

  for segment in &segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(Placeholder::Var(var)) => result.push_str(resolver.resolve_var(*var)?),
      Segment::Placeholder(Placeholder::Dep(name)) => result.push_str(resolver.resolve_dep(name)?),
    }
  }

  Ok(result)
}
