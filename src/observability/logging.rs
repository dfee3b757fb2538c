//! # Structured Logging
//!
//! JSON log output through `tracing-subscriber`, filtered by `RUST_LOG` with a
//! crate-level default.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_LOG_FILTER: &str = "storefront_shield=info,tower_http=info";

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed, which happens when
/// several tests initialize logging in one process.
pub fn init_logging() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .is_ok()
}
