//! Error types for Stratus cache operations.

use std::time::Duration;
use thiserror::Error;

/// Remote store connectivity errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Store unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Connection retries exhausted after {attempts} attempts over {elapsed:?}")]
    RetriesExhausted { attempts: u32, elapsed: Duration },

    #[error("Store command failed: {command}: {reason}")]
    CommandFailed { command: String, reason: String },
}

/// Value encode/decode errors.
///
/// These are always absorbed by the cache core: a value that cannot be
/// decoded is a cache miss, never a fatal error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode failed: {reason}")]
    Decode { reason: String },

    #[error("Compression failed: {reason}")]
    Compress { reason: String },

    #[error("Decompression failed: {reason}")]
    Decompress { reason: String },
}

/// Malformed arguments to a public method.
///
/// Unlike infrastructure failures these surface immediately: they are
/// programming errors, not runtime conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cache key must not be empty")]
    EmptyKey,

    #[error("Invalid scan pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },
}

/// The caller-supplied populate callback failed.
///
/// Propagated to the awaiting caller set and never cached; the fetch lock
/// is released promptly so a retry is not starved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Populate failed for key {key}: {reason}")]
pub struct PopulateError {
    pub key: String,
    pub reason: String,
}

impl PopulateError {
    /// Wrap a caller error for the given cache key.
    pub fn new(key: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Master error type for all Stratus operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Populate error: {0}")]
    Populate(#[from] PopulateError),
}

impl CacheError {
    /// True for failures the cache core absorbs into degraded behavior
    /// (miss / failed write) rather than surfacing to callers.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Serialization(_))
    }
}

/// Result type alias for Stratus operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::RetriesExhausted {
            attempts: 5,
            elapsed: Duration::from_secs(3),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("5 attempts"));
    }

    #[test]
    fn test_populate_error_display() {
        let err = PopulateError::new("cache:user:1", "backend timed out");
        let msg = format!("{}", err);
        assert!(msg.contains("cache:user:1"));
        assert!(msg.contains("backend timed out"));
    }

    #[test]
    fn test_from_conversions() {
        let conn = CacheError::from(ConnectionError::Unreachable {
            reason: "refused".to_string(),
        });
        assert!(matches!(conn, CacheError::Connection(_)));

        let ser = CacheError::from(SerializationError::Decode {
            reason: "truncated".to_string(),
        });
        assert!(matches!(ser, CacheError::Serialization(_)));

        let val = CacheError::from(ValidationError::EmptyKey);
        assert!(matches!(val, CacheError::Validation(_)));

        let pop = CacheError::from(PopulateError::new("k", "boom"));
        assert!(matches!(pop, CacheError::Populate(_)));
    }

    #[test]
    fn test_propagation_policy() {
        assert!(CacheError::from(ConnectionError::Unreachable {
            reason: "down".to_string(),
        })
        .is_infrastructure());
        assert!(CacheError::from(SerializationError::Encode {
            reason: "bad".to_string(),
        })
        .is_infrastructure());
        assert!(!CacheError::from(ValidationError::EmptyKey).is_infrastructure());
        assert!(!CacheError::from(PopulateError::new("k", "boom")).is_infrastructure());
    }

    #[test]
    fn test_error_is_clone() {
        // Coalesced waiters share one populate outcome, so the error half
        // of the result must clone.
        let err = CacheError::from(PopulateError::new("k", "boom"));
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
