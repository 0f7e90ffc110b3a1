use crate::core::{
    display::{DisplaySink, LineDecoder},
    lock,
    session::{
        reader::{pump, LoopExit, ReaderStrategy, StreamReader},
        state::{ConnectOutcome, SessionState},
    },
    transport::{Port, PortInfo, PortProvider},
};
use crate::domain::{
    config::{PortConfig, PortFilter},
    error::{SerialTermError, SerialTermResult},
};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cancellation handle for the reader currently locked by the read loop
struct ActiveReader {
    cancel: oneshot::Sender<()>,
    strategy: ReaderStrategy,
}

/// A single logical connection to a serial-like device.
///
/// The transport reference is shared between the controller methods and the
/// background read loop. Whoever takes it out of `transport` first owns the
/// close; the other side only observes that it is gone.
pub struct Session {
    provider: Arc<dyn PortProvider>,
    config: PortConfig,
    filter: PortFilter,
    sink: Arc<dyn DisplaySink>,
    state: watch::Sender<SessionState>,
    transport: Mutex<Option<Arc<dyn Port>>>,
    active_reader: Mutex<Option<ActiveReader>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    connect_gate: tokio::sync::Mutex<()>,
}

impl Session {
    /// Create a new session
    pub fn new(
        provider: Arc<dyn PortProvider>,
        config: PortConfig,
        filter: PortFilter,
        sink: Arc<dyn DisplaySink>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Disconnected);

        Arc::new(Self {
            provider,
            config,
            filter,
            sink,
            state,
            transport: Mutex::new(None),
            active_reader: Mutex::new(None),
            read_task: Mutex::new(None),
            connect_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Select a port, open it and start the read loop
    pub async fn connect(self: &Arc<Self>) -> ConnectOutcome {
        let Ok(_gate) = self.connect_gate.try_lock() else {
            debug!("connect() ignored: another connect is in progress");
            return ConnectOutcome::Ignored;
        };

        if self.state() != SessionState::Disconnected || self.has_transport() {
            debug!("connect() ignored in state {}", self.state());
            return ConnectOutcome::Ignored;
        }

        if let Err(e) = self.config.validate() {
            self.sink.console(&e.to_string());
            return ConnectOutcome::Failed;
        }

        let port = match self.provider.request_port(&self.filter).await {
            Ok(Some(port)) => port,
            Ok(None) => {
                info!("Port selection cancelled");
                return ConnectOutcome::Cancelled;
            }
            Err(e) => {
                warn!("Port selection failed: {}", e);
                return ConnectOutcome::Cancelled;
            }
        };

        let info = port.info();
        {
            let mut transport = lock(&self.transport);
            *transport = Some(Arc::clone(&port));
            self.set_state(SessionState::Connecting);
        }
        self.sink.console(&format!("Connecting to {}...", info));

        if let Err(e) = port.open(&self.config).await {
            error!("Failed to open {}: {}", info, e);
            self.sink.console(&e.to_string());
            if self.take_if_owner(&port).is_some() {
                self.reset();
            }
            return ConnectOutcome::Failed;
        }

        if !self.transition_if_owner(&port, SessionState::Connected) {
            // disconnect() ran while the open was pending and handed the close to us
            info!("Open of {} superseded by disconnect", info);
            if let Err(e) = port.close().await {
                warn!("Failed to close superseded port {}: {}", info, e);
                self.sink.console(&e.to_string());
            }
            return ConnectOutcome::Cancelled;
        }

        info!("Connected to {}", info);
        self.sink.console(&format!("Connected to {}", info));

        // hold the slot across the spawn so disconnect() never finds it empty
        {
            let mut read_task = lock(&self.read_task);
            *read_task = Some(tokio::spawn(Arc::clone(self).read_loop(port)));
        }
        ConnectOutcome::Connected
    }

    /// Cancel the reader, close the port and return to `Disconnected`
    pub async fn disconnect(&self) {
        let (previous, transport, active) = {
            let mut transport = lock(&self.transport);
            let previous = self.state();
            if matches!(
                previous,
                SessionState::Disconnected | SessionState::Disconnecting
            ) {
                debug!("disconnect() ignored in state {}", previous);
                return;
            }
            self.set_state(SessionState::Disconnecting);
            (previous, transport.take(), lock(&self.active_reader).take())
        };
        info!("Disconnecting from state {}", previous);

        if let Some(active) = active {
            debug!("Cancelling {} reader", active.strategy);
            let _ = active.cancel.send(());
        }

        // the read loop releases its reader before it exits
        let task = lock(&self.read_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Read loop ended abnormally: {}", e);
            }
        }

        match (previous, transport) {
            (SessionState::Connecting, Some(_)) => {
                debug!("Open still pending, connect() closes the port");
            }
            (_, Some(port)) => self.close_port(port.as_ref()).await,
            (_, None) => {}
        }

        self.reset();
        self.sink.console("Disconnected");
    }

    /// Send bytes to the device
    pub async fn write(&self, data: &[u8]) -> SerialTermResult<()> {
        let port = {
            let transport = lock(&self.transport);
            match self.state() {
                SessionState::Connected => transport.clone(),
                _ => None,
            }
        };

        let Some(port) = port.filter(|p| p.writable()) else {
            warn!("Write of {} bytes ignored: session is {}", data.len(), self.state());
            return Err(SerialTermError::NotConnected);
        };

        let mut writer = match port.writer().await {
            Ok(writer) => writer,
            Err(e) => {
                error!("Failed to acquire writer: {}", e);
                self.sink.console(&e.to_string());
                return Err(e);
            }
        };
        let result = writer.write(data).await;
        writer.release();

        match &result {
            Ok(()) => debug!("Wrote {} bytes", data.len()),
            Err(e) => {
                error!("Write failed: {}", e);
                self.sink.console(&e.to_string());
            }
        }
        result
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn has_transport(&self) -> bool {
        lock(&self.transport).is_some()
    }

    pub fn has_active_reader(&self) -> bool {
        lock(&self.active_reader).is_some()
    }

    /// Strategy of the reader currently in flight
    pub fn reader_strategy(&self) -> Option<ReaderStrategy> {
        lock(&self.active_reader).as_ref().map(|a| a.strategy)
    }

    pub fn port_info(&self) -> Option<PortInfo> {
        lock(&self.transport).as_ref().map(|p| p.info())
    }

    pub fn provider(&self) -> &Arc<dyn PortProvider> {
        &self.provider
    }

    pub fn sink(&self) -> &Arc<dyn DisplaySink> {
        &self.sink
    }

    // Private methods

    async fn read_loop(self: Arc<Self>, port: Arc<dyn Port>) {
        let mut decoder = LineDecoder::new();

        let failure = loop {
            if !self.is_owner(&port) || !port.readable() {
                break None;
            }

            let mut reader = match StreamReader::acquire(port.as_ref(), self.config.buffer_size).await
            {
                Ok(reader) => reader,
                Err(e) => break Some(e),
            };

            let (cancel, mut cancelled) = oneshot::channel();
            let strategy = reader.strategy();
            if !self.register_reader(&port, ActiveReader { cancel, strategy }) {
                reader.release();
                break None;
            }
            debug!("Read loop running with {} reader", strategy);

            let exit = pump(&mut reader, &mut cancelled, &mut decoder, self.sink.as_ref()).await;
            lock(&self.active_reader).take();

            match exit {
                LoopExit::StreamEnded => debug!("Readable stream completed"),
                LoopExit::Cancelled => break None,
                LoopExit::Failed(e) => break Some(e),
            }
        };

        if let Some(e) = failure {
            error!("Read loop stopped: {}", e);
            self.sink.console(&e.to_string());
        }

        let Some(port) = self.take_if_owner(&port) else {
            debug!("Read loop exited after disconnect took the port");
            return;
        };
        self.close_port(port.as_ref()).await;
        self.reset();
        self.sink.console("Disconnected");
    }

    fn register_reader(&self, port: &Arc<dyn Port>, active: ActiveReader) -> bool {
        let transport = lock(&self.transport);
        if !owns(&transport, port) || self.state() != SessionState::Connected {
            return false;
        }
        *lock(&self.active_reader) = Some(active);
        true
    }

    fn is_owner(&self, port: &Arc<dyn Port>) -> bool {
        owns(&lock(&self.transport), port)
    }

    /// Move to `next` if `port` is still the session's transport
    fn transition_if_owner(&self, port: &Arc<dyn Port>, next: SessionState) -> bool {
        let transport = lock(&self.transport);
        if !owns(&transport, port) {
            return false;
        }
        self.set_state(next);
        true
    }

    /// Take the transport for teardown if `port` is still the session's transport
    fn take_if_owner(&self, port: &Arc<dyn Port>) -> Option<Arc<dyn Port>> {
        let mut transport = lock(&self.transport);
        if !owns(&transport, port) {
            return None;
        }
        self.set_state(SessionState::Disconnecting);
        transport.take()
    }

    async fn close_port(&self, port: &dyn Port) {
        match port.close().await {
            Ok(()) => info!("Closed {}", port.info()),
            Err(e) => {
                error!("Failed to close {}: {}", port.info(), e);
                self.sink.console(&e.to_string());
            }
        }
    }

    fn reset(&self) {
        lock(&self.transport).take();
        lock(&self.active_reader).take();
        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session state {} -> {}", previous, next);
        }
    }
}

fn owns(transport: &Option<Arc<dyn Port>>, port: &Arc<dyn Port>) -> bool {
    transport.as_ref().is_some_and(|current| {
        std::ptr::eq(
            Arc::as_ptr(current) as *const (),
            Arc::as_ptr(port) as *const (),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::display::MemorySink;
    use crate::infrastructure::mock::{MockPort, MockPortHandle, MockProvider, MockSelection};
    use std::time::Duration;

    fn create_test_session(port: MockPort) -> (Arc<Session>, MockPortHandle, Arc<MemorySink>) {
        let handle = port.handle();
        let sink = Arc::new(MemorySink::new());
        let session = Session::new(
            Arc::new(MockProvider::new(port)),
            PortConfig::default(),
            PortFilter::default(),
            sink.clone(),
        );
        (session, handle, sink)
    }

    async fn wait_for_state(session: &Session, expected: SessionState) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == expected))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    async fn wait_for_reader(session: &Session) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !session.has_active_reader() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reader never became active");
    }

    #[tokio::test]
    async fn test_connect_applies_configuration() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        assert_eq!(session.connect().await, ConnectOutcome::Connected);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(handle.last_config(), Some(PortConfig::default()));
        assert!(sink.console_contains("Connected to mock0"));

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_ignored_when_connected() {
        let (session, handle, _sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        assert_eq!(session.connect().await, ConnectOutcome::Ignored);
        assert_eq!(handle.open_count(), 1);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_read() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        wait_for_reader(&session).await;
        assert_eq!(session.reader_strategy(), Some(ReaderStrategy::ZeroCopy));

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.has_active_reader());
        assert!(!session.has_transport());
        assert!(!handle.reader_locked());
        assert_eq!(handle.close_count(), 1);
        assert!(!sink.console_contains("Failed to close"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, handle, _sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_end_tears_down() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        handle.feed(b"bye\n");
        handle.end();
        wait_for_state(&session, SessionState::Disconnected).await;

        assert_eq!(sink.terminal_text(), "bye\n");
        assert_eq!(handle.close_count(), 1);
        assert!(!handle.is_open());
        assert!(!session.has_transport());
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        handle.fail_read("device unplugged");
        wait_for_state(&session, SessionState::Disconnected).await;

        assert!(sink.console_contains("Read error: device unplugged"));
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_returns_to_disconnected() {
        let port = MockPort::new("mock0");
        port.handle().fail_open("access denied");
        let (session, handle, sink) = create_test_session(port);

        assert_eq!(session.connect().await, ConnectOutcome::Failed);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.has_transport());
        assert!(sink.console_contains("Failed to open port: access denied"));
        assert_eq!(handle.close_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_selection_is_silent() {
        let sink = Arc::new(MemorySink::new());
        let provider = Arc::new(MockProvider::new(MockPort::new("mock0")));
        provider.set_selection(MockSelection::Cancel);
        let session = Session::new(
            provider.clone(),
            PortConfig::default(),
            PortFilter::default(),
            sink.clone(),
        );

        assert_eq!(session.connect().await, ConnectOutcome::Cancelled);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(sink.console_messages().is_empty());

        provider.set_selection(MockSelection::Fail("no permission".to_string()));
        assert_eq!(session.connect().await, ConnectOutcome::Cancelled);
        assert!(sink.console_messages().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_connect() {
        let sink = Arc::new(MemorySink::new());
        let session = Session::new(
            Arc::new(MockProvider::new(MockPort::new("mock0"))),
            PortConfig {
                data_bits: 4,
                ..PortConfig::default()
            },
            PortFilter::default(),
            sink.clone(),
        );

        assert_eq!(session.connect().await, ConnectOutcome::Failed);
        assert!(sink.console_contains("Invalid data bits"));
    }

    #[tokio::test]
    async fn test_close_failure_still_disconnects() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        handle.fail_close("device busy");
        session.disconnect().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(sink.console_contains("Failed to close port: device busy"));
    }

    #[tokio::test]
    async fn test_disconnect_while_connecting() {
        let port = MockPort::new("mock0");
        port.handle().hold_open();
        let (session, handle, _sink) = create_test_session(port);

        let connecting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect().await })
        };
        wait_for_state(&session, SessionState::Connecting).await;

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);

        handle.release_open();
        let outcome = connecting.await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Cancelled);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!handle.is_open());
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_superseded_open_close_failure_is_reported() {
        let port = MockPort::new("mock0");
        port.handle().hold_open();
        let (session, handle, sink) = create_test_session(port);

        let connecting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect().await })
        };
        wait_for_state(&session, SessionState::Connecting).await;

        handle.fail_close("device busy");
        session.disconnect().await;
        handle.release_open();

        assert_eq!(connecting.await.unwrap(), ConnectOutcome::Cancelled);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(sink.console_contains("Failed to close port: device busy"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_racing_connect_waits_for_read_loop() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        for round in 0..50 {
            let connecting = {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.connect().await })
            };
            tokio::task::yield_now().await;
            session.disconnect().await;
            connecting.await.unwrap();
            session.disconnect().await;

            assert_eq!(session.state(), SessionState::Disconnected, "round {}", round);
            assert!(!handle.reader_locked(), "round {}", round);
            assert!(!handle.is_open(), "round {}", round);
        }

        assert!(!sink.console_contains("Failed to close"));
    }

    #[tokio::test]
    async fn test_write_releases_writer() {
        let (session, handle, _sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        session.write(b"AT\r\n").await.unwrap();
        assert_eq!(handle.written(), b"AT\r\n");
        assert!(!handle.writer_locked());

        session.disconnect().await;
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_write_while_disconnected() {
        let (session, handle, _sink) = create_test_session(MockPort::new("mock0"));

        let result = session.write(b"x").await;
        assert!(matches!(result, Err(SerialTermError::NotConnected)));
        assert_eq!(handle.write_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        handle.fail_write("buffer overrun");
        assert!(session.write(b"x").await.is_err());
        assert!(sink.console_contains("Write error: buffer overrun"));
        assert!(!handle.writer_locked());

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (session, handle, sink) = create_test_session(MockPort::new("mock0"));

        session.connect().await;
        session.disconnect().await;
        assert_eq!(session.connect().await, ConnectOutcome::Connected);

        handle.feed(b"again\r\n");
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.terminal_text().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no output after reconnect");
        session.disconnect().await;

        assert_eq!(sink.terminal_text(), "again\n");
        assert_eq!(handle.open_count(), 2);
        assert_eq!(handle.close_count(), 2);
    }
}
