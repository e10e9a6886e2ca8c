//! Namespaced cache keys.
//!
//! Every key the cache touches goes through [`KeyBuilder`], so the
//! configured namespace prefix cannot be bypassed: there is no other way to
//! form a store key in this crate.

use stratus_core::{CacheResult, ValidationError};

/// Builds store keys under a fixed namespace prefix.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// Create a builder for the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the store key for a caller-supplied logical key.
    ///
    /// An empty logical key is a programming error and surfaces as
    /// [`ValidationError::EmptyKey`].
    pub fn build(&self, logical: &str) -> CacheResult<String> {
        if logical.is_empty() {
            return Err(ValidationError::EmptyKey.into());
        }
        Ok(format!("{}{}", self.prefix, logical))
    }

    /// Build a scan pattern, namespaced under the prefix.
    ///
    /// The pattern itself may contain glob metacharacters; an empty pattern
    /// is rejected the same way an empty key is.
    pub fn pattern(&self, pattern: &str) -> CacheResult<String> {
        if pattern.is_empty() {
            return Err(ValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        Ok(format!("{}{}", self.prefix, pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prepends_prefix() {
        let keys = KeyBuilder::new("cache:");
        assert_eq!(keys.build("user:1").unwrap(), "cache:user:1");
    }

    #[test]
    fn test_empty_logical_key_rejected() {
        let keys = KeyBuilder::new("cache:");
        assert!(keys.build("").is_err());
    }

    #[test]
    fn test_pattern_is_namespaced() {
        let keys = KeyBuilder::new("cache:");
        assert_eq!(keys.pattern("user:*").unwrap(), "cache:user:*");
        assert_eq!(keys.pattern("*").unwrap(), "cache:*");
        assert!(keys.pattern("").is_err());
    }

    #[test]
    fn test_empty_prefix_is_allowed() {
        // The namespace is configuration; opting out is legitimate.
        let keys = KeyBuilder::new("");
        assert_eq!(keys.build("k").unwrap(), "k");
    }
}
