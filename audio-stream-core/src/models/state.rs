use std::fmt;

/// Adapter lifecycle state machine.
///
/// State transitions:
/// ```text
/// idle ──start──→ running ──abort──→ stopped
///   │                │
///   │              quit
///   │                ↓
///   └───quit───→ stopping ──device drained──→ stopped
/// ```
///
/// `Stopped` is terminal: a new adapter with a fresh device handle is
/// needed to capture or play again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl AdapterState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Whether new reads or writes may still be queued.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Which side of the bridge an adapter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterRole {
    Capture,
    Playback,
}

impl fmt::Display for AdapterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.write_str("capture"),
            Self::Playback => f.write_str("playback"),
        }
    }
}
