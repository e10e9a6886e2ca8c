//! Shared types for the Stratus cache layer.
//!
//! This crate holds the pieces every other Stratus crate needs: the error
//! taxonomy with its propagation policy, and the configuration surface for
//! the cache core.
//!
//! # Error Philosophy
//!
//! Infrastructure failures (store unreachable, payload would not decode)
//! degrade the cache to pass-through behavior and are absorbed by the cache
//! core. Caller-logic failures (invalid arguments, a populate callback that
//! failed) propagate normally. The master [`CacheError`] is `Clone` so a
//! single populate outcome can be shared among every coalesced waiter.

pub mod config;
pub mod error;

pub use config::CacheConfig;
pub use error::{
    CacheError, CacheResult, ConnectionError, PopulateError, SerializationError, ValidationError,
};
