//! Package-level constants.

use std::time::Duration;

/// Current version of the cos client (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "cos";

/// Base URL of the server instance.
pub const API_BASE: &str = "https://calamityofsubterfuge.com";

/// Value of the `Origin` header on websockets. The server rejects sockets
/// without it.
pub const WEBSOCKET_ORIGIN: &str = "https://calamityofsubterfuge.com";

/// How long a single socket write may take before the socket is closed.
pub const CONN_WRITE_TIMEOUT: Duration = Duration::from_secs(20);

/// How long the socket may go without any inbound traffic before it is closed.
pub const CONN_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Connection identifier used for the control-plane (lobby) socket.
pub const CONTROL_CONNECTION_ID: &str = "ls";

/// Number of random bytes in a generated session uid.
pub const SESSION_UID_BYTES: usize = 23;
