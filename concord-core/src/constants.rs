//! Default values shared across the workspace.

/// Backing-store endpoint used when `REDIS_URL` is unset.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Upper bound on a single backing-store round trip.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;

/// Coalesced write-buffer drain period.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Coalesced read-cache re-read period.
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 200;

/// Expiry applied to acquired locks.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;

/// First value handed out by a fresh identity counter.
pub const DEFAULT_ID_START: u32 = 1_000_000_000;

/// SCAN page size hint.
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// How often the transition sweeper looks for stale handoffs.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

/// Age after which a session stuck in `Transition` is expired.
pub const DEFAULT_TRANSITION_TIMEOUT_SECS: u64 = 5;
