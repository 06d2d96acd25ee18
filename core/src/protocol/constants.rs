//! Centralized protocol constants
//!
//! All protocol-level constants are defined here to ensure consistency
//! across the codebase and make configuration easier.

use std::time::Duration;

/// Default TCP port for the blob stream server
pub const DEFAULT_STREAM_PORT: u16 = 17418;

/// Default TCP port a peer exposes its control endpoint on
pub const DEFAULT_CONTROL_PORT: u16 = 17419;

/// mDNS service type for peer discovery
pub const SERVICE_TYPE: &str = "_airlift._tcp.local.";

/// Info string for the control-message subkey derivation
pub const MESSAGE_KEY_INFO: &str = "airlift message key v1";

/// Info string for the derived discovery/channel identifier
pub const CHANNEL_ID_INFO: &str = "airlift channel id v1";

/// PBKDF2-HMAC-SHA256 iteration count for the master key
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Accepted age of a received control message (staleness/replay guard)
pub const MAX_MESSAGE_AGE_MS: u64 = 60_000;

/// Maximum stream frame payload (100 MiB)
pub const MAX_PAYLOAD: usize = 100 * 1024 * 1024;

/// Reserved frame length announcing a PING
pub const PING_SENTINEL: i32 = 0;

/// Reserved frame length announcing a PONG
pub const PONG_SENTINEL: i32 = -1;

/// Blob chunk size on the stream channel (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Interval between keepalive pings on a stream session
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// How long a keepalive ping waits for its pong
pub const PONG_TIMEOUT: Duration = Duration::from_secs(2);

/// Control channel connect attempts before giving up
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Delay between control channel connect attempts
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Overall deadline for a control channel connect, retries included
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for dialing a stream channel connection
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Unit budget of the control channel (small-message channel)
pub const CONTROL_MTU: usize = 512;

/// Upper bound accepted for a single inbound control unit
pub const CONTROL_UNIT_LIMIT: usize = 16 * 1024;

/// Default bound on the persisted history
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Current protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Clipboard polling interval in milliseconds
pub const CLIPBOARD_POLL_INTERVAL_MS: u64 = 500;
