use serde::Serialize;

/// Connection state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No transport selected
    #[default]
    Disconnected,
    /// Port selected, open in progress
    Connecting,
    /// Port open and the read loop running
    Connected,
    /// Teardown in progress
    Disconnecting,
}

impl SessionState {
    /// Whether the transport reference may be present in this state
    pub fn holds_transport(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Disconnecting)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// What a call to `connect()` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The port is open and the read loop is running
    Connected,
    /// Selection was declined, or a disconnect interrupted the open
    Cancelled,
    /// The port could not be opened
    Failed,
    /// The session was not disconnected, nothing was done
    Ignored,
}
