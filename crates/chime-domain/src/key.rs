//! Event identity and its dispatch hash.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Delimiter used when none is configured.
pub const DEFAULT_HASH_DELIMITER: &str = "::";

/// Unique identity of a scheduled event: a category `slug` plus an optional
/// disambiguating `key` (empty when absent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub slug: String,
    #[serde(default)]
    pub key: String,
}

impl EventKey {
    pub fn new(slug: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            key: key.into(),
        }
    }

    /// Member id of this event in the dispatch structure: `slug + delimiter + key`.
    pub fn hash(&self, delimiter: &str) -> String {
        let mut hash = String::with_capacity(self.slug.len() + delimiter.len() + self.key.len());
        hash.push_str(&self.slug);
        hash.push_str(delimiter);
        hash.push_str(&self.key);
        hash
    }

    /// Split a hash at the first delimiter. A hash without a delimiter is a
    /// bare slug with an empty key.
    pub fn from_hash(hash: &str, delimiter: &str) -> Self {
        match hash.split_once(delimiter) {
            Some((slug, key)) => Self::new(slug, key),
            None => Self::new(hash, ""),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.slug, self.key)
    }
}
