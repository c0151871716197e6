//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] / [`init_json_subscriber`] install the process-wide
//!   stderr subscriber
//! - [`capture_logs`] installs a thread-local capture layer for tests
//!
//! Connection ids and session uids travel as structured fields (`conn_id`,
//! `session_id`), never formatted into the message.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, otherwise `level`.
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install compact human-readable output on stderr.
///
/// Only the first installation in a process takes effect.
pub fn init_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Install JSON-lines output on stderr.
///
/// Only the first installation in a process takes effect.
pub fn init_json_subscriber(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .json()
        .try_init();
}
