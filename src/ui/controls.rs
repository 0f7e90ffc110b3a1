use crate::core::session::{ConnectOutcome, Session, SessionState};
use crate::domain::{
    config::LineEnding,
    error::{SerialTermError, SerialTermResult},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, warn};

/// What the connect/disconnect toggle does when triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Connect,
    Disconnect,
}

impl std::fmt::Display for ToggleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToggleAction::Connect => write!(f, "Connect"),
            ToggleAction::Disconnect => write!(f, "Disconnect"),
        }
    }
}

/// Enablement of the user-facing controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub toggle: ToggleAction,
    pub toggle_enabled: bool,
    /// Text input and send button
    pub send_enabled: bool,
}

impl Controls {
    pub fn for_state(state: SessionState, supported: bool) -> Self {
        if !supported {
            return Self {
                toggle: ToggleAction::Connect,
                toggle_enabled: false,
                send_enabled: false,
            };
        }

        match state {
            SessionState::Disconnected => Self {
                toggle: ToggleAction::Connect,
                toggle_enabled: true,
                send_enabled: false,
            },
            SessionState::Connecting => Self {
                toggle: ToggleAction::Disconnect,
                toggle_enabled: false,
                send_enabled: false,
            },
            SessionState::Connected => Self {
                toggle: ToggleAction::Disconnect,
                toggle_enabled: true,
                send_enabled: true,
            },
            SessionState::Disconnecting => Self {
                toggle: ToggleAction::Disconnect,
                toggle_enabled: false,
                send_enabled: false,
            },
        }
    }
}

/// Result of pressing the toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleResult {
    Connect(ConnectOutcome),
    Disconnected,
    Disabled,
}

/// Binds the toggle and send controls to a session
pub struct ControlPanel {
    session: Arc<Session>,
    line_ending: LineEnding,
    supported: bool,
    reported: AtomicBool,
}

impl ControlPanel {
    pub fn new(session: Arc<Session>, line_ending: LineEnding) -> Self {
        let supported = session.provider().is_supported();

        Self {
            session,
            line_ending,
            supported,
            reported: AtomicBool::new(false),
        }
    }

    /// Report a missing serial capability. Only the first call says anything.
    pub fn startup(&self) -> bool {
        if !self.supported && !self.reported.swap(true, Ordering::SeqCst) {
            warn!("Serial capability missing, controls disabled");
            self.session
                .sink()
                .console(&SerialTermError::Unsupported.to_string());
        }
        self.supported
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn controls(&self) -> Controls {
        Controls::for_state(self.session.state(), self.supported)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn toggle(&self) -> ToggleResult {
        let controls = self.controls();
        if !controls.toggle_enabled {
            debug!("Toggle ignored while disabled");
            return ToggleResult::Disabled;
        }

        match controls.toggle {
            ToggleAction::Connect => ToggleResult::Connect(self.session.connect().await),
            ToggleAction::Disconnect => {
                self.session.disconnect().await;
                ToggleResult::Disconnected
            }
        }
    }

    /// Send a line of user text followed by the configured terminator
    pub async fn send(&self, text: &str) -> SerialTermResult<()> {
        let mut payload = Vec::with_capacity(text.len() + 2);
        payload.extend_from_slice(text.as_bytes());
        payload.extend_from_slice(self.line_ending.as_bytes());
        self.session.write(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::display::MemorySink;
    use crate::domain::config::{PortConfig, PortFilter};
    use crate::infrastructure::mock::{MockPort, MockProvider};

    #[test]
    fn test_send_enabled_only_when_connected() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Disconnecting,
        ] {
            assert!(!Controls::for_state(state, true).send_enabled);
        }
        assert!(Controls::for_state(SessionState::Connected, true).send_enabled);
    }

    #[test]
    fn test_toggle_labels() {
        assert_eq!(
            Controls::for_state(SessionState::Disconnected, true).toggle,
            ToggleAction::Connect
        );
        assert_eq!(
            Controls::for_state(SessionState::Connected, true).toggle,
            ToggleAction::Disconnect
        );
        assert!(!Controls::for_state(SessionState::Connecting, true).toggle_enabled);
        assert!(!Controls::for_state(SessionState::Disconnecting, true).toggle_enabled);
    }

    #[test]
    fn test_unsupported_disables_everything() {
        let controls = Controls::for_state(SessionState::Disconnected, false);
        assert!(!controls.toggle_enabled);
        assert!(!controls.send_enabled);
    }

    #[tokio::test]
    async fn test_unsupported_environment_reported_once() {
        let sink = Arc::new(MemorySink::new());
        let provider = Arc::new(MockProvider::new(MockPort::new("mock0")).unsupported());
        let session = Session::new(
            provider.clone(),
            PortConfig::default(),
            PortFilter::default(),
            sink.clone(),
        );

        let panel = ControlPanel::new(session, LineEnding::CrLf);
        assert!(!panel.startup());
        assert!(!panel.startup());
        assert_eq!(panel.toggle().await, ToggleResult::Disabled);
        assert_eq!(panel.toggle().await, ToggleResult::Disabled);

        assert_eq!(sink.console_messages().len(), 1);
        assert!(sink.console_contains("not supported"));
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_and_send() {
        let port = MockPort::new("mock0");
        let handle = port.handle();
        let session = Session::new(
            Arc::new(MockProvider::new(port)),
            PortConfig::default(),
            PortFilter::default(),
            Arc::new(MemorySink::new()),
        );
        let panel = ControlPanel::new(session, LineEnding::CrLf);
        assert!(panel.startup());

        assert_eq!(
            panel.toggle().await,
            ToggleResult::Connect(ConnectOutcome::Connected)
        );
        assert!(panel.controls().send_enabled);

        panel.send("AT").await.unwrap();
        assert_eq!(handle.written(), b"AT\r\n");

        assert_eq!(panel.toggle().await, ToggleResult::Disconnected);
        assert!(!panel.controls().send_enabled);
        assert_eq!(panel.controls().toggle, ToggleAction::Connect);
    }
}
