//! reelsmith-core: shared error type, identifiers, configuration, and the
//! retry executor used around flaky upstream generation calls.
//!
//! This crate is the foundational dependency for the other reelsmith crates.

pub mod config;
pub mod error;
pub mod ids;
pub mod retry;

pub use error::{Error, Result};
pub use ids::RunId;
pub use retry::{
    is_transient_message, RetryError, RetryExecutor, RetryPolicy, RetryStats, RetryStatsSnapshot,
};
