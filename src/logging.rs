//! Tracing subscriber setup shared by the service and the offline tools

use crate::config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` directives are honored; the configured level applies to this
/// crate's targets on top of them.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let directive = format!("churn_prediction_service={}", config.level);
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.as_str() {
        "json" => builder.json().with_current_span(false).try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}
