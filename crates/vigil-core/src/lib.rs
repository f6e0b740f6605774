//! # vigil-core
//!
//! Core primitives shared by the vigil telemetry collection services.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - **Identifiers**: Strongly-typed ULID identifiers for collection tasks,
//!   verification tasks, side-effect jobs, and host records
//! - **Time Windows**: Half-open collection windows and bucket arithmetic
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use vigil_core::prelude::*;
//!
//! let task_id = DataCollectionTaskId::generate();
//! let verification_task_id = VerificationTaskId::generate();
//! assert_ne!(task_id.to_string(), verification_task_id.to_string());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;
pub mod time;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{DataCollectionTaskId, HostRecordId, SideKickId, VerificationTaskId};
    pub use crate::time::{TimeWindow, floor_to_bucket};
}

pub use error::{Error, Result};
pub use id::{DataCollectionTaskId, HostRecordId, SideKickId, VerificationTaskId};
pub use observability::{LogFormat, init_logging};
pub use time::{TimeWindow, floor_to_bucket};
