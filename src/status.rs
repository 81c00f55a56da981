//! Liveness classification from heartbeat staleness
//!
//! ```text
//!   delta < 300s          → online
//!   300s <= delta < 600s  → warning
//!   delta >= 600s         → offline
//! ```
//!
//! Each band is closed on its lower bound, so a heartbeat exactly 300 seconds
//! old is already a warning and one exactly 600 seconds old is offline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Heartbeat age (seconds) at which an online system becomes a warning
pub const WARNING_AFTER_SECS: i64 = 5 * 60;

/// Heartbeat age (seconds) at which a system is considered offline
pub const OFFLINE_AFTER_SECS: i64 = 10 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Online,
    Warning,
    Offline,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Online => "online",
            SystemStatus::Warning => "warning",
            SystemStatus::Offline => "offline",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SystemStatus::Online => 0,
            SystemStatus::Warning => 1,
            SystemStatus::Offline => 2,
        }
    }

    /// True if `self` is a strictly worse liveness state than `other`
    pub fn is_worse_than(&self, other: SystemStatus) -> bool {
        self.rank() > other.rank()
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(SystemStatus::Online),
            "warning" => Ok(SystemStatus::Warning),
            "offline" => Ok(SystemStatus::Offline),
            other => Err(format!("unknown system status '{other}'")),
        }
    }
}

/// Classify a system from its last heartbeat
///
/// Heartbeats in the future (clock skew) count as fresh.
pub fn classify(last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> SystemStatus {
    // whole seconds truncate toward zero, which for positive ages is a floor
    let age = (now - last_heartbeat).num_seconds();

    if age < WARNING_AFTER_SECS {
        SystemStatus::Online
    } else if age < OFFLINE_AFTER_SECS {
        SystemStatus::Warning
    } else {
        SystemStatus::Offline
    }
}

/// Like [`classify`], but a system that never reported is offline
pub fn classify_heartbeat(last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SystemStatus {
    last_heartbeat.map_or(SystemStatus::Offline, |last| classify(last, now))
}
