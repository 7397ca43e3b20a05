use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "pickbeat=debug,warn";

/// Initialize logging with tracing
///
/// - Reads the filter from `RUST_LOG` if available
/// - Falls back to [`DEFAULT_FILTER`] otherwise
/// - Later calls are no-ops, so tests and embedders may call it freely
///
/// # Example
///
/// ```no_run
/// use pickbeat::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("pickbeat logging initialized");
    }
}
