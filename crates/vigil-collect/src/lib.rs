//! # vigil-collect
//!
//! Collection scheduling, time-series bucketing, and deferred side effects
//! for continuous verification.
//!
//! ## Core Concepts
//!
//! - **Data Collection Task**: a time-bounded collection job claimed by a
//!   remote worker, either periodic (ServiceGuard) or part of a sequential
//!   chain (Deployment)
//! - **Verification Task**: the opaque join key every store is keyed by
//! - **Time-Series Record**: one bucket of one metric for one host, holding
//!   appended group values that are later annotated with risk
//! - **Sidekick**: a fire-and-forget job dispatched to a per-type executor
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  claim/report   ┌────────────────────────┐
//! │ remote worker│ ──────────────► │ DataCollectionScheduler│──► TaskStore
//! └──────────────┘                 └───────────┬────────────┘
//!        │ samples                             │ queue analysis
//!        ▼                                     ▼
//! ┌──────────────────┐              ┌──────────────────────┐
//! │TimeSeriesIngestor│◄── risk ─────│ AnalysisOrchestrator │
//! └──────────────────┘              └──────────────────────┘
//! ```
//!
//! All correctness under concurrency rests on the stores' atomic claim and
//! compare-and-swap primitives; nothing here blocks or coordinates in-process.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod external;
pub mod host;
pub mod metrics;
pub mod scheduler;
pub mod sidekick;
pub mod source;
pub mod store;
pub mod task;
pub mod timeseries;
pub mod verification;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::CollectionConfig;
    pub use crate::error::{Error, Result};
    pub use crate::external::{
        AnalysisOrchestrator, ProgressLog, ProgressTracker, WorkerRegistrar,
    };
    pub use crate::host::{HostRecord, HostRecordStore};
    pub use crate::scheduler::{Collaborators, DataCollectionScheduler};
    pub use crate::sidekick::{
        DrainSummary, ExecutorRegistry, SideKick, SideKickData, SideKickExecutor,
        SideKickQueue, SideKickRetryPolicy, SideKickStatus, SideKickStore, SideKickType,
    };
    pub use crate::source::{DataSource, DataSourceRepository};
    pub use crate::store::{CasResult, TaskStore};
    pub use crate::task::{
        DataCollectionTask, DataCollectionTaskType, ReportedStatus, TaskResult, TaskStatus,
    };
    pub use crate::timeseries::{
        IngestSummary, MetricPack, MetricRisk, MetricType, RiskSummary, TimeSeriesIngestor,
        TimeSeriesRecord, TimeSeriesSample, TimeSeriesStore,
    };
    pub use crate::verification::{TaskInfo, VerificationTask, VerificationTaskMapper};
}

pub use error::{Error, Result};
