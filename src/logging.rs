use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    reload::{Handle, Layer as ReloadLayer},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::LoggingError;

/// Global reload handle so the filter can be changed at runtime.
static RELOAD: OnceCell<Handle<EnvFilter, Registry>> = OnceCell::new();

/// Initialize console logging. `RUST_LOG` wins over `default_level`.
/// Returns the filter string actually applied.
pub fn init_logging(default_level: &str) -> String {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (reload_layer, handle) = ReloadLayer::new(filter);

    let initialized = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok();
    if initialized {
        RELOAD.set(handle).ok();
    }

    level
}

/// Replace the active filter, e.g. "warn" or "info,ng112::app=debug".
///
/// # Errors
/// [`LoggingError::InvalidFilter`] for an unparsable filter,
/// [`LoggingError::NotInitialized`] before [`init_logging`] installed the
/// subscriber.
pub fn set_level(filter: &str) -> Result<(), LoggingError> {
    let parsed = EnvFilter::try_new(filter).map_err(|err| LoggingError::InvalidFilter {
        filter: filter.to_string(),
        message: err.to_string(),
    })?;
    let handle = RELOAD.get().ok_or(LoggingError::NotInitialized)?;

    handle
        .reload(parsed)
        .map_err(|err| LoggingError::Reload(err.to_string()))?;
    info!("[set_level] Log filter is now {filter}");
    Ok(())
}
