//! Various crate-wide constants.

use crate::commons::actor::Actor;


//------------ Config Defaults ----------------------------------------------

/// The default log level.
pub const DFLT_LOG_LEVEL: &str = "info";

/// The number of attempts a command gets before a conflict is surfaced.
pub const DFLT_COMMAND_MAX_ATTEMPTS: u32 = 3;

/// The fixed part of the backoff between command attempts in milliseconds.
pub const DFLT_COMMAND_RETRY_BASE_MS: u64 = 20;

/// The random part of the backoff between command attempts in milliseconds.
pub const DFLT_COMMAND_RETRY_JITTER_MS: u64 = 30;

/// How long a command waits for an aggregate lock in milliseconds.
pub const DFLT_LOCK_TIMEOUT_MS: u64 = 5_000;


//------------ BGP ----------------------------------------------------------

/// Announcements seen by fewer RIS peers than this are ignored.
pub const BGP_RIS_VISIBILITY_THRESHOLD: u32 = 5;

/// IPv4 announcements less specific than this are ignored.
pub const BGP_IPV4_PREFIX_LEN_FLOOR: u8 = 8;

/// IPv6 announcements less specific than this are ignored.
pub const BGP_IPV6_PREFIX_LEN_FLOOR: u8 = 12;


//------------ Audit --------------------------------------------------------

/// The maximum number of audit records returned by a history query.
pub const AUDIT_MAX_RECENT_COMMANDS: usize = 2500;


//------------ Metrics ------------------------------------------------------

/// The prefix of all metric names.
pub const METRICS_PREFIX: &str = "rpkicore";


//------------ Actors -------------------------------------------------------

/// The actor for commands the engine sends on its own behalf.
pub const ACTOR_DEF_SYSTEM: Actor = Actor::system("rpkicore");
