use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize structured logging.
///
/// JSON output for production, pretty output for development, optional file
/// output next to stdout behaviour. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let file_writer = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(std::sync::Arc::new(file))
        }
        None => None,
    };

    if config.format == "json" {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_line_number(true)
            .with_file(true);
        match file_writer {
            Some(writer) => registry.with(layer.with_writer(writer)).init(),
            None => registry.with(layer).init(),
        }
    } else {
        let layer = fmt::layer().pretty().with_target(true);
        match file_writer {
            Some(writer) => registry.with(layer.with_writer(writer)).init(),
            None => registry.with(layer).init(),
        }
    }

    Ok(())
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
