//! Package versions and version constraints.
//!
//! Versions are semantic versions, but recipes commonly write short forms such
//! as `1.2`. Missing components are padded for comparison while the original
//! text is kept for display, so `1.2` sorts as `1.2.0` and prints as `1.2`.
//!
//! Constraints accept:
//! - `*` or an empty string (any version)
//! - a bare version, meaning an exact pin (`3.0.7`)
//! - comparator lists separated by commas or whitespace (`>=1.0, <2`)
//! - the same wrapped in brackets (`[>=1.46 <2]`)

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
  #[error("invalid version '{raw}': {reason}")]
  InvalidVersion { raw: String, reason: String },

  #[error("invalid constraint '{raw}': {reason}")]
  InvalidConstraint { raw: String, reason: String },
}

/// A concrete package version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
  raw: String,
  semver: Version,
}

impl PackageVersion {
  pub fn parse(raw: &str) -> Result<Self, VersionError> {
    let raw = raw.trim();
    if raw.is_empty() {
      return Err(VersionError::InvalidVersion {
        raw: raw.to_string(),
        reason: "version is empty".to_string(),
      });
    }

    let semver = Version::parse(&pad_version(raw)).map_err(|e| VersionError::InvalidVersion {
      raw: raw.to_string(),
      reason: e.to_string(),
    })?;

    Ok(Self {
      raw: raw.to_string(),
      semver,
    })
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn semver(&self) -> &Version {
    &self.semver
  }
}

/// Pad `1` / `1.2` to `1.2.0`, keeping any pre-release or build suffix.
fn pad_version(raw: &str) -> String {
  let split = raw.find(['-', '+']).unwrap_or(raw.len());
  let (core, suffix) = raw.split_at(split);
  let components = core.split('.').count();
  let padding = match components {
    1 => ".0.0",
    2 => ".0",
    _ => "",
  };
  format!("{core}{padding}{suffix}")
}

impl PartialEq for PackageVersion {
  fn eq(&self, other: &Self) -> bool {
    self.semver == other.semver
  }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.semver.hash(state);
  }
}

impl PartialOrd for PackageVersion {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for PackageVersion {
  fn cmp(&self, other: &Self) -> Ordering {
    self.semver.cmp(&other.semver)
  }
}

impl fmt::Display for PackageVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl TryFrom<String> for PackageVersion {
  type Error = VersionError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<PackageVersion> for String {
  fn from(value: PackageVersion) -> Self {
    value.raw
  }
}

/// A version constraint as declared by a consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Constraint {
  raw: String,
  req: VersionReq,
}

impl Constraint {
  pub fn parse(raw: &str) -> Result<Self, VersionError> {
    let trimmed = raw.trim();
    let inner = trimmed
      .strip_prefix('[')
      .and_then(|s| s.strip_suffix(']'))
      .unwrap_or(trimmed)
      .trim();

    let invalid = |reason: String| VersionError::InvalidConstraint {
      raw: trimmed.to_string(),
      reason,
    };

    if inner.is_empty() || inner == "*" {
      return Ok(Self {
        raw: trimmed.to_string(),
        req: VersionReq::STAR,
      });
    }

    let comparators = split_comparators(inner);
    if comparators.is_empty() {
      return Err(invalid("no comparators".to_string()));
    }

    let normalized: Vec<String> = comparators
      .into_iter()
      .map(|c| {
        if c.starts_with(|ch: char| ch.is_ascii_digit()) {
          format!("={c}")
        } else {
          c
        }
      })
      .collect();

    let req = VersionReq::parse(&normalized.join(", ")).map_err(|e| invalid(e.to_string()))?;

    Ok(Self {
      raw: trimmed.to_string(),
      req,
    })
  }

  pub fn any() -> Self {
    Self {
      raw: "*".to_string(),
      req: VersionReq::STAR,
    }
  }

  pub fn matches(&self, version: &PackageVersion) -> bool {
    self.req.matches(version.semver())
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }
}

/// Split `>= 1.0, <2 ~1.4` into `[">=1.0", "<2", "~1.4"]`.
///
/// An operator separated from its version by whitespace is joined back.
fn split_comparators(input: &str) -> Vec<String> {
  let mut result: Vec<String> = Vec::new();
  let mut pending_op: Option<String> = None;

  for token in input.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
    let is_bare_op = token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^'));
    if is_bare_op {
      pending_op = Some(token.to_string());
      continue;
    }
    match pending_op.take() {
      Some(op) => result.push(format!("{op}{token}")),
      None => result.push(token.to_string()),
    }
  }

  if let Some(op) = pending_op {
    result.push(op);
  }

  result
}

impl PartialEq for Constraint {
  fn eq(&self, other: &Self) -> bool {
    self.req == other.req
  }
}

impl Eq for Constraint {}

impl fmt::Display for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl TryFrom<String> for Constraint {
  type Error = VersionError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<Constraint> for String {
  fn from(value: Constraint) -> Self {
    value.raw
  }
}
