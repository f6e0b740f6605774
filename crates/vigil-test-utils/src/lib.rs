//! Shared test utilities for vigil integration tests.
//!
//! This crate provides:
//! - [`TestContext`]: a scheduler, ingestor, and sidekick store wired over
//!   in-memory stores
//! - Recording fakes for every outbound collaborator
//! - Factory functions for creating test data
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_test_utils::{TestContext, t0};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let window = vigil_core::TimeWindow::starting_at(t0(), chrono::Duration::minutes(5));
//!     ctx.add_data_source("cv-1", window).await;
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fakes;
pub mod fixtures;

pub use assertions::*;
pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("vigil_collect=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
