// Logging
// The terminal belongs to the UI, so everything goes to a file.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber writing to `log_file`. `RUST_LOG` overrides
/// the default `info` level.
pub fn init(log_file: &Path) -> Result<()> {
    let file = File::create(log_file)
        .with_context(|| format!("cannot create log file {}", log_file.display()))?;

    build_subscriber(file)
        .try_init()
        .context("a global tracing subscriber is already installed")?;
    Ok(())
}

pub fn build_subscriber(file: File) -> impl tracing::Subscriber + Send + Sync {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_thread_names(true);

    tracing_subscriber::registry().with(fmt_layer).with(env_filter)
}
