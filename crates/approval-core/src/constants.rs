/// Approval gate constants

/// Interval between two polls of the record store
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default SMTP submission port
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Username used when a signal file does not name the acting user
pub const UNKNOWN_USER: &str = "unknown";
