#![forbid(unsafe_code)]

//! Subscriber setup for hosts that do not install their own.
//!
//! Both initializers honour `RUST_LOG` when it is set and fall back to the
//! given directive otherwise. Calling either one twice is harmless: the
//! second call returns `false` and leaves the first subscriber in place.

use tracing_subscriber::EnvFilter;

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Human-readable output on stderr. Returns whether this call installed
/// the global subscriber.
pub fn init_logging(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// One JSON object per event on stderr, for production log shipping.
pub fn init_json_logging(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(default_directive))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
