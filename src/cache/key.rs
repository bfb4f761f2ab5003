//! Structured query identities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Ordered, structured name of one cached result set.
///
/// The first component is the entity class, followed by scope and filter
/// parts in a fixed order. Two logically identical requests always build the
/// same identity, so they share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryIdentity {
  class: String,
  parts: Vec<String>,
}

impl QueryIdentity {
  pub fn new<I, S>(class: impl Into<String>, parts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      class: class.into(),
      parts: parts.into_iter().map(Into::into).collect(),
    }
  }

  pub fn class(&self) -> &str {
    &self.class
  }

  pub fn parts(&self) -> &[String] {
    &self.parts
  }

  /// Order-stable serialization: a JSON array of class followed by parts.
  pub fn canonical(&self) -> String {
    let mut segments = Vec::with_capacity(self.parts.len() + 1);
    segments.push(self.class.as_str());
    segments.extend(self.parts.iter().map(String::as_str));
    // Serializing a slice of &str cannot fail.
    serde_json::to_string(&segments).unwrap_or_default()
  }

  /// SHA256 of the canonical form, used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// True when `self` equals `prefix` or extends it with more parts.
  pub fn starts_with(&self, prefix: &QueryIdentity) -> bool {
    self.class == prefix.class && self.parts.starts_with(&prefix.parts)
  }
}

impl fmt::Display for QueryIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}

/// Typed query keys implemented once per entity class.
pub trait QueryKey {
  /// Identity of the cached result set this key names.
  fn identity(&self) -> QueryIdentity;

  /// Human readable description for logs.
  fn description(&self) -> String {
    self.identity().to_string()
  }
}

impl QueryKey for QueryIdentity {
  fn identity(&self) -> QueryIdentity {
    self.clone()
  }
}

/// Predicate on identities in data form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityScope {
  Exact(QueryIdentity),
  Class(String),
  Prefix(QueryIdentity),
  AnyOf(Vec<IdentityScope>),
}

impl IdentityScope {
  pub fn exact(key: &impl QueryKey) -> Self {
    IdentityScope::Exact(key.identity())
  }

  pub fn class(class: impl Into<String>) -> Self {
    IdentityScope::Class(class.into())
  }

  pub fn none() -> Self {
    IdentityScope::AnyOf(Vec::new())
  }

  pub fn matches(&self, identity: &QueryIdentity) -> bool {
    match self {
      IdentityScope::Exact(expected) => expected == identity,
      IdentityScope::Class(class) => identity.class() == class,
      IdentityScope::Prefix(prefix) => identity.starts_with(prefix),
      IdentityScope::AnyOf(scopes) => scopes.iter().any(|s| s.matches(identity)),
    }
  }

  /// Combine two scopes into one matching either.
  pub fn or(self, other: IdentityScope) -> Self {
    match self {
      IdentityScope::AnyOf(mut scopes) => {
        scopes.push(other);
        IdentityScope::AnyOf(scopes)
      }
      scope => IdentityScope::AnyOf(vec![scope, other]),
    }
  }
}
