//! Global tracing subscriber.

use std::sync::Once;

use tracing::subscriber::set_global_default;
use tracing_subscriber::{fmt, layer::SubscriberExt, registry, EnvFilter};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Level filter from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global subscriber and routes `log` records into it.
/// Calls after the first are no-ops.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let json = config.json;
        let subscriber = registry()
            .with(env_filter(config))
            .with(json.then(|| fmt::layer().json().with_target(true)))
            .with((!json).then(|| fmt::layer().with_target(false)));

        // Another subscriber was installed by the host.
        if set_global_default(subscriber).is_err() {
            return;
        }
        if let Err(e) = tracing_log::LogTracer::init() {
            tracing::debug!("log bridge not installed: {}", e);
        }
    });
}
