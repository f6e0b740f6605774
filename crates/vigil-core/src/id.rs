//! Strongly-typed identifiers for vigil entities.
//!
//! All identifiers are:
//! - **Strongly typed**: Prevents mixing a task id with a verification task id
//! - **Lexicographically sortable**: ULIDs encode creation time and sort naturally
//! - **Globally unique**: No coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use vigil_core::id::{DataCollectionTaskId, VerificationTaskId};
//!
//! let task = DataCollectionTaskId::generate();
//! let verification_task = VerificationTaskId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: DataCollectionTaskId = verification_task;
//! # let _ = (task, verification_task);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an identifier from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the ID.
            #[must_use]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
                chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!(concat!("invalid ", $label, " '{}': {}"), s, e),
                    })
            }
        }
    };
}

ulid_id!(
    /// A unique identifier for a data collection task.
    ///
    /// Collection tasks are the unit of work claimed by remote workers.
    DataCollectionTaskId,
    "data collection task ID"
);

ulid_id!(
    /// The opaque join key binding a monitoring configuration, SLI, or
    /// deployment verification to the task and time-series stores.
    VerificationTaskId,
    "verification task ID"
);

ulid_id!(
    /// A unique identifier for a deferred side-effect job.
    SideKickId,
    "sidekick ID"
);

ulid_id!(
    /// A unique identifier for a host population record.
    HostRecordId,
    "host record ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrip() {
        let id = DataCollectionTaskId::generate();
        let parsed: DataCollectionTaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(VerificationTaskId::generate(), VerificationTaskId::generate());
    }

    #[test]
    fn invalid_id_names_the_type() {
        let err = "nope".parse::<SideKickId>().unwrap_err();
        assert!(err.to_string().contains("sidekick ID"));
    }

    #[test]
    fn serializes_transparently() {
        let id = HostRecordId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
