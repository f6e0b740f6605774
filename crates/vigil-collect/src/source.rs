//! Configured data sources.
//!
//! A data source is a monitoring provider connection (one CV config) whose
//! collection is driven by ServiceGuard tasks. Only the fields the scheduler
//! needs live here; provider-specific shaping stays in `data_collection_info`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vigil_core::TimeWindow;

use crate::error::Result;

/// A configured monitoring data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Data source (CV config) identifier.
    pub id: String,
    /// Owning account.
    pub account_id: String,
    /// Connector used to reach the provider.
    pub connector_identifier: String,
    /// Disabled sources are not re-scheduled.
    pub enabled: bool,
    /// Window collected by the first task.
    pub initial_window: TimeWindow,
    /// Provider-specific collection settings copied onto each task.
    pub data_collection_info: serde_json::Value,
    /// Worker registered for this source, once enqueued.
    pub data_collection_worker_id: Option<String>,
}

/// Lookup and worker bookkeeping for data sources.
#[async_trait]
pub trait DataSourceRepository: Send + Sync {
    /// Gets a data source by ID.
    async fn get(&self, account_id: &str, data_source_id: &str) -> Result<Option<DataSource>>;

    /// Records the worker registered for a data source.
    async fn set_worker_id(
        &self,
        account_id: &str,
        data_source_id: &str,
        worker_id: &str,
    ) -> Result<()>;
}
