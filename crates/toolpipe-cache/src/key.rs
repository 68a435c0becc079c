//! Cache key construction.
//!
//! Keys are colon-joined segments: `prefix:tool_name:digest`. The digest is
//! the SHA-256 of the arguments serialized with `serde_json`, whose object
//! maps iterate in sorted key order, so equal arguments always produce the
//! same key regardless of how they were built.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Segment separator.
pub const SEPARATOR: &str = ":";

/// Hex-encoded SHA-256 of the canonical JSON form of `arguments`.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] if the value cannot be encoded.
pub fn hash_arguments(arguments: &Value) -> Result<String, CacheError> {
    let canonical = serde_json::to_string(arguments)?;
    Ok(hash_str(&canonical))
}

/// Hex-encoded SHA-256 of `input`.
pub fn hash_str(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Builds namespaced keys.
///
/// ```rust
/// use serde_json::json;
/// use toolpipe_cache::KeyBuilder;
///
/// let keys = KeyBuilder::new("firefly");
/// assert_eq!(keys.build(["account", "42"]), "firefly:account:42");
///
/// let a = keys.tool_key("list_accounts", &json!({"type": "asset", "page": 1})).unwrap();
/// let b = keys.tool_key("list_accounts", &json!({"page": 1, "type": "asset"})).unwrap();
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// Creates a builder. An empty prefix adds no leading segment.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Joins the prefix and `parts` with colons. Empty segments are skipped.
    pub fn build<I, S>(&self, parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = self.prefix.clone();
        for part in parts {
            let part = part.as_ref();
            if part.is_empty() {
                continue;
            }
            if !key.is_empty() {
                key.push_str(SEPARATOR);
            }
            key.push_str(part);
        }
        key
    }

    /// Key for one tool invocation: `prefix:tool_name:sha256(arguments)`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the arguments cannot be
    /// encoded.
    pub fn tool_key(&self, tool_name: &str, arguments: &Value) -> Result<String, CacheError> {
        let digest = hash_arguments(arguments)?;
        Ok(self.build([tool_name, digest.as_str()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_skips_empty_segments() {
        assert_eq!(KeyBuilder::default().build(["a", "", "b"]), "a:b");
        assert_eq!(KeyBuilder::new("p").build(Vec::<String>::new()), "p");
    }

    #[test]
    fn digest_is_fixed_length() {
        let small = hash_arguments(&json!({})).unwrap();
        let large = hash_arguments(&json!({"blob": "x".repeat(10_000)})).unwrap();
        assert_eq!(small.len(), 64);
        assert_eq!(large.len(), 64);
        assert_ne!(small, large);
    }

    #[test]
    fn tool_key_depends_on_tool_and_arguments() {
        let keys = KeyBuilder::new("mcp");
        let base = keys.tool_key("list_accounts", &json!({"page": 1})).unwrap();

        assert!(base.starts_with("mcp:list_accounts:"));
        assert_ne!(base, keys.tool_key("list_budgets", &json!({"page": 1})).unwrap());
        assert_ne!(base, keys.tool_key("list_accounts", &json!({"page": 2})).unwrap());
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
