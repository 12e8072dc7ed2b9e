//! System-wide constants and defaults.

/// Application name, also passed as the reason for guest shutdowns.
pub const APP_NAME: &str = "QuickVM";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "qvm";

/// WMI namespace of the v2 virtualization provider.
pub const V2_NAMESPACE: &str = r"root\virtualization\v2";

/// WMI namespace of the legacy v1 virtualization provider.
pub const V1_NAMESPACE: &str = r"root\virtualization";

/// Interval at which the hypervisor is checked for state changes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default address the background service listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:47310";

/// Outbound queue depth per connected subscriber.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Maximum time a single frame write to a subscriber may take.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound on a single IPC frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
