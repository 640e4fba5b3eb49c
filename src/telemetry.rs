use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize structured logging to stderr.
///
/// `RUST_LOG` wins over `level` when set. Calling this twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init_telemetry(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(level, json, "phasegate telemetry initialized");
    }
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one orchestrated sync
pub fn create_sync_span(
    operation: &str,
    kind: &str,
    business_id: &str,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "entity_sync",
        operation = operation,
        entity.kind = kind,
        entity.business_id = business_id,
        correlation.id = correlation_id,
    )
}

/// Span wrapping a bulk run; per-item sync spans nest under it
pub fn create_bulk_span(operation: &str, item_count: usize, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "bulk_operation",
        operation = operation,
        bulk.items = item_count,
        correlation.id = correlation_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_telemetry("warn", false).is_ok());
        assert!(init_telemetry("warn", true).is_ok());
    }
}
