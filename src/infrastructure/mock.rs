//! Scripted in-memory transport.
//!
//! `MockPort` behaves like a device whose incoming bytes are pushed by the
//! test through a `MockPortHandle`. Failures at every stage can be injected,
//! and the handle exposes counters so lifecycle properties (close at most
//! once, writer released after a write) can be asserted.

use crate::core::lock;
use crate::core::transport::{
    Chunk, ChunkRead, FilledBuffer, Port, PortInfo, PortProvider, PortWriter, ZeroCopyRead,
};
use crate::domain::{
    config::{PortConfig, PortFilter},
    error::{SerialTermError, SerialTermResult},
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

enum MockRead {
    Data(Vec<u8>),
    Fail(String),
}

enum Next {
    Data(Vec<u8>),
    End,
}

struct MockState {
    feed_tx: Mutex<Option<mpsc::UnboundedSender<MockRead>>>,
    feed_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRead>>,
    pending: Mutex<Vec<u8>>,
    opened: AtomicBool,
    ended: AtomicBool,
    errored: AtomicBool,
    reader_locked: AtomicBool,
    writer_locked: AtomicBool,
    open_error: Mutex<Option<String>>,
    close_error: Mutex<Option<String>>,
    write_error: Mutex<Option<String>>,
    open_gate: Mutex<Option<Arc<Notify>>>,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
    write_count: AtomicUsize,
    written: Mutex<Vec<u8>>,
    last_config: Mutex<Option<PortConfig>>,
}

impl MockState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            feed_tx: Mutex::new(Some(tx)),
            feed_rx: tokio::sync::Mutex::new(rx),
            pending: Mutex::new(Vec::new()),
            opened: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            reader_locked: AtomicBool::new(false),
            writer_locked: AtomicBool::new(false),
            open_error: Mutex::new(None),
            close_error: Mutex::new(None),
            write_error: Mutex::new(None),
            open_gate: Mutex::new(None),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
            last_config: Mutex::new(None),
        }
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn lock_reader(&self) -> SerialTermResult<()> {
        if !self.is_open() || self.errored.load(Ordering::SeqCst) {
            return Err(SerialTermError::ReadFailed(
                "readable stream is not available".to_string(),
            ));
        }
        self.reader_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| SerialTermError::StreamLocked)
    }

    async fn next(&self) -> SerialTermResult<Next> {
        let pending = std::mem::take(&mut *lock(&self.pending));
        if !pending.is_empty() {
            return Ok(Next::Data(pending));
        }
        if !self.is_open() {
            return Ok(Next::End);
        }

        let mut rx = self.feed_rx.lock().await;
        match rx.recv().await {
            Some(MockRead::Data(data)) => Ok(Next::Data(data)),
            Some(MockRead::Fail(message)) => {
                self.errored.store(true, Ordering::SeqCst);
                Err(SerialTermError::ReadFailed(message))
            }
            None => {
                self.ended.store(true, Ordering::SeqCst);
                Ok(Next::End)
            }
        }
    }
}

/// In-memory port driven by a `MockPortHandle`
pub struct MockPort {
    info: PortInfo,
    zero_copy: bool,
    state: Arc<MockState>,
}

impl MockPort {
    pub fn new(name: &str) -> Self {
        Self {
            info: PortInfo::named(name),
            zero_copy: true,
            state: Arc::new(MockState::new()),
        }
    }

    /// Reject zero-copy readers, forcing the allocating fallback
    pub fn without_zero_copy(mut self) -> Self {
        self.zero_copy = false;
        self
    }

    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.info.usb_vendor_id = Some(vendor_id);
        self.info.usb_product_id = Some(product_id);
        self
    }

    pub fn handle(&self) -> MockPortHandle {
        MockPortHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Test-side control over a `MockPort`
#[derive(Clone)]
pub struct MockPortHandle {
    state: Arc<MockState>,
}

impl MockPortHandle {
    /// Queue bytes for the device to "send"
    pub fn feed(&self, bytes: &[u8]) {
        if let Some(tx) = lock(&self.state.feed_tx).as_ref() {
            let _ = tx.send(MockRead::Data(bytes.to_vec()));
        }
    }

    /// Queue a read failure
    pub fn fail_read(&self, message: &str) {
        if let Some(tx) = lock(&self.state.feed_tx).as_ref() {
            let _ = tx.send(MockRead::Fail(message.to_string()));
        }
    }

    /// End the readable stream once queued data is drained
    pub fn end(&self) {
        lock(&self.state.feed_tx).take();
    }

    pub fn fail_open(&self, message: &str) {
        *lock(&self.state.open_error) = Some(message.to_string());
    }

    pub fn fail_close(&self, message: &str) {
        *lock(&self.state.close_error) = Some(message.to_string());
    }

    pub fn fail_write(&self, message: &str) {
        *lock(&self.state.write_error) = Some(message.to_string());
    }

    /// Make `open` wait until `release_open` is called
    pub fn hold_open(&self) {
        *lock(&self.state.open_gate) = Some(Arc::new(Notify::new()));
    }

    pub fn release_open(&self) {
        if let Some(gate) = lock(&self.state.open_gate).take() {
            gate.notify_one();
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn reader_locked(&self) -> bool {
        self.state.reader_locked.load(Ordering::SeqCst)
    }

    pub fn writer_locked(&self) -> bool {
        self.state.writer_locked.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.state.open_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.state.write_count.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.state.written).clone()
    }

    pub fn last_config(&self) -> Option<PortConfig> {
        *lock(&self.state.last_config)
    }
}

#[async_trait]
impl Port for MockPort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    async fn open(&self, config: &PortConfig) -> SerialTermResult<()> {
        let gate = lock(&self.state.open_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.state.is_open() {
            return Err(SerialTermError::OpenFailed("port is already open".to_string()));
        }
        if let Some(message) = lock(&self.state.open_error).clone() {
            return Err(SerialTermError::OpenFailed(message));
        }

        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.last_config) = Some(*config);
        self.state.errored.store(false, Ordering::SeqCst);
        self.state.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn readable(&self) -> bool {
        self.state.is_open()
            && !self.state.errored.load(Ordering::SeqCst)
            && !self.state.ended.load(Ordering::SeqCst)
    }

    fn writable(&self) -> bool {
        self.state.is_open()
    }

    async fn zero_copy_reader(&self) -> SerialTermResult<Box<dyn ZeroCopyRead>> {
        if !self.zero_copy {
            return Err(SerialTermError::ZeroCopyUnsupported);
        }
        self.state.lock_reader()?;
        Ok(Box::new(MockReader {
            state: Arc::clone(&self.state),
            released: false,
        }))
    }

    async fn chunk_reader(&self) -> SerialTermResult<Box<dyn ChunkRead>> {
        self.state.lock_reader()?;
        Ok(Box::new(MockReader {
            state: Arc::clone(&self.state),
            released: false,
        }))
    }

    async fn writer(&self) -> SerialTermResult<Box<dyn PortWriter>> {
        if !self.state.is_open() {
            return Err(SerialTermError::WriteFailed("port is not open".to_string()));
        }
        self.state
            .writer_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SerialTermError::StreamLocked)?;
        Ok(Box::new(MockWriter {
            state: Arc::clone(&self.state),
            released: false,
        }))
    }

    async fn close(&self) -> SerialTermResult<()> {
        self.state.close_count.fetch_add(1, Ordering::SeqCst);

        if !self.state.is_open() {
            return Err(SerialTermError::CloseFailed("port is not open".to_string()));
        }
        if self.state.reader_locked.load(Ordering::SeqCst) {
            return Err(SerialTermError::CloseFailed(
                "readable stream is locked".to_string(),
            ));
        }

        self.state.opened.store(false, Ordering::SeqCst);
        match lock(&self.state.close_error).clone() {
            Some(message) => Err(SerialTermError::CloseFailed(message)),
            None => Ok(()),
        }
    }
}

struct MockReader {
    state: Arc<MockState>,
    released: bool,
}

#[async_trait]
impl ZeroCopyRead for MockReader {
    async fn read_into(&mut self, mut buf: Vec<u8>) -> SerialTermResult<FilledBuffer> {
        match self.state.next().await? {
            Next::Data(data) => {
                let filled = data.len().min(buf.len());
                buf[..filled].copy_from_slice(&data[..filled]);
                if filled < data.len() {
                    *lock(&self.state.pending) = data[filled..].to_vec();
                }
                Ok(FilledBuffer {
                    buf,
                    filled,
                    done: false,
                })
            }
            Next::End => Ok(FilledBuffer {
                buf,
                filled: 0,
                done: true,
            }),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.reader_locked.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ChunkRead for MockReader {
    async fn read(&mut self) -> SerialTermResult<Chunk> {
        match self.state.next().await? {
            Next::Data(data) => Ok(Chunk { data, done: false }),
            Next::End => Ok(Chunk {
                data: Vec::new(),
                done: true,
            }),
        }
    }

    fn release(&mut self) {
        ZeroCopyRead::release(self);
    }
}

struct MockWriter {
    state: Arc<MockState>,
    released: bool,
}

#[async_trait]
impl PortWriter for MockWriter {
    async fn write(&mut self, data: &[u8]) -> SerialTermResult<()> {
        if let Some(message) = lock(&self.state.write_error).clone() {
            return Err(SerialTermError::WriteFailed(message));
        }
        self.state.write_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.written).extend_from_slice(data);
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.writer_locked.store(false, Ordering::SeqCst);
        }
    }
}

/// How `MockProvider::request_port` answers
#[derive(Debug, Clone)]
pub enum MockSelection {
    /// First port matching the filter
    First,
    /// The user declines the prompt
    Cancel,
    /// The prompt itself fails
    Fail(String),
}

/// Provider over a fixed set of mock ports
pub struct MockProvider {
    ports: Vec<Arc<MockPort>>,
    selection: Mutex<MockSelection>,
    supported: bool,
    requests: AtomicUsize,
}

impl MockProvider {
    pub fn new(port: MockPort) -> Self {
        Self {
            ports: vec![Arc::new(port)],
            selection: Mutex::new(MockSelection::First),
            supported: true,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            ports: Vec::new(),
            selection: Mutex::new(MockSelection::First),
            supported: true,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn with_port(mut self, port: MockPort) -> Self {
        self.ports.push(Arc::new(port));
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn set_selection(&self, selection: MockSelection) {
        *lock(&self.selection) = selection;
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortProvider for MockProvider {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn request_port(&self, filter: &PortFilter) -> SerialTermResult<Option<Arc<dyn Port>>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.supported {
            return Err(SerialTermError::Unsupported);
        }

        let selection = lock(&self.selection).clone();
        match selection {
            MockSelection::First => Ok(self
                .ports
                .iter()
                .find(|p| filter.matches(p.info.usb_vendor_id, p.info.usb_product_id))
                .map(|p| Arc::clone(p) as Arc<dyn Port>)),
            MockSelection::Cancel => Ok(None),
            MockSelection::Fail(message) => Err(SerialTermError::InvalidInput(message)),
        }
    }

    async fn known_ports(&self) -> SerialTermResult<Vec<PortInfo>> {
        if !self.supported {
            return Err(SerialTermError::Unsupported);
        }
        Ok(self.ports.iter().map(|p| p.info.clone()).collect())
    }
}
