pub mod api_wrapper;
pub mod config;
pub mod errors;
pub mod federation;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{BackendConfig, GatewayConfig, LogFormat, LoggingConfig, WrapperConfig};
pub use errors::GatewayError;
pub use federation::{BackendStatus, ConnectionStatus, Gateway, GatewayMetrics};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `mcpilot` logs at the configured level
/// and everything else at `warn`. Logs go to stderr so a stdio client on
/// stdout is never corrupted. A second call leaves the first subscriber in
/// place.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mcpilot={},warn", config.level)));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };

    if installed.is_ok() {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            pid = std::process::id(),
            "=== MCPilot starting ==="
        );
    }
}
