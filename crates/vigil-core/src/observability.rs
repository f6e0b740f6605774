//! Observability infrastructure for vigil.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization and span constructors shared by the
//! collection scheduler, the time-series ingestor, and the sidekick queue.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name, falling back to [`LogFormat::Pretty`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `vigil_collect=debug`)
///
/// # Example
///
/// ```rust
/// use vigil_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .try_init();
            }
        }
    });
}

/// Creates a span for collection task operations.
///
/// # Example
///
/// ```rust
/// use vigil_core::observability::collection_span;
///
/// let span = collection_span("claim_next", "acme", "worker-1");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn collection_span(operation: &str, account_id: &str, worker_id: &str) -> Span {
    tracing::info_span!(
        "collection",
        op = operation,
        account_id = account_id,
        worker_id = worker_id,
    )
}

/// Creates a span for time-series ingestion.
#[must_use]
pub fn ingestion_span(operation: &str, account_id: &str, verification_task_id: &str) -> Span {
    tracing::info_span!(
        "ingestion",
        op = operation,
        account_id = account_id,
        verification_task_id = verification_task_id,
    )
}

/// Creates a span for sidekick execution.
#[must_use]
pub fn sidekick_span(operation: &str, sidekick_id: &str, sidekick_type: &str) -> Span {
    tracing::info_span!(
        "sidekick",
        op = operation,
        sidekick_id = sidekick_id,
        sidekick_type = sidekick_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_log_format_from_name() {
        assert_eq!(LogFormat::from_name("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("other"), LogFormat::Pretty);
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = collection_span("claim_next", "acme", "worker-1");
        let _guard = span.enter();
        tracing::info!("collection message");

        let span = ingestion_span("ingest", "acme", "vt");
        let _guard = span.enter();

        let span = sidekick_span("execute", "sk", "webhook_call");
        let _guard = span.enter();
    }
}
