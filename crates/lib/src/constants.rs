//! Constants used throughout the Tether library.
//!
//! Central definitions for reserved identities, agents and default limits.

/// Numeric id of the root identity that owns internal sessions.
pub const ROOT_USER_ID: i64 = 0;

/// User name of the root identity.
pub const ROOT_USER_NAME: &str = "root";

/// Numeric id of the system group the root identity belongs to.
pub const SYSTEM_GROUP_ID: i64 = 0;

/// Name of the system group.
pub const SYSTEM_GROUP_NAME: &str = "system";

/// User name used for unauthenticated callers.
pub const GUEST_USER_NAME: &str = "guest";

/// User agent recorded on internal sessions.
pub const INTERNAL_AGENT: &str = "internal";

/// Event type used when a principal does not name one.
pub const DEFAULT_EVENT_TYPE: &str = "User";

/// Event type recorded on internal sessions.
pub const INTERNAL_EVENT_TYPE: &str = "Internal";

/// Default number of closed sessions the in-memory provider keeps queryable.
pub const CLOSED_SESSION_CAPACITY: usize = 512;

/// Default time-to-live for new sessions (0 disables the limit).
pub const DEFAULT_TTL_MS: u64 = 0;

/// Default time-to-idle for new sessions: ten minutes.
pub const DEFAULT_TTI_MS: u64 = 10 * 60 * 1000;

/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30 * 1000;
