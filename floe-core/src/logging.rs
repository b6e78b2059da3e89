//! ABOUTME: Logging infrastructure and structured logging utilities
//! ABOUTME: Provides tracing initialization for host processes

/// Initialize structured logging with env-filter support.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| e.to_string())?;
    Ok(())
}
