use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a conversation transcriber
///
/// `Idle -> Starting -> Streaming -> Stopping -> Stopped`, with
/// `Streaming -> Canceled` on failure and `Closed` reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
    Stopped,
    Canceled,
    Closed,
}

impl SessionState {
    /// States in which roster mutations are accepted
    pub fn accepts_roster_changes(self) -> bool {
        matches!(self, Self::Idle | Self::Streaming)
    }

    /// States in which the service may still deliver recognition events
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Streaming | Self::Stopping)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
