use crate::core::lock;
use crate::core::transport::{
    Chunk, ChunkRead, FilledBuffer, Port, PortInfo, PortWriter, ZeroCopyRead,
};
use crate::domain::{
    config::PortConfig,
    error::{SerialTermError, SerialTermResult},
};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Port read timeout; bounds how long a cancelled read keeps the blocking pool busy
const READ_POLL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for in-flight blocking I/O during close
const CLOSE_DRAIN: Duration = Duration::from_secs(2);

struct DeviceInner {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    buffer_size: AtomicUsize,
    failed: AtomicBool,
    reader_locked: AtomicBool,
    writer_locked: AtomicBool,
    /// Cloned OS handles still alive, including ones inside a detached blocking call
    leases: AtomicUsize,
    drained: Notify,
}

impl DeviceInner {
    fn is_open(&self) -> bool {
        lock(&self.port).is_some()
    }

    fn lease(self: &Arc<Self>) -> SerialTermResult<Lease> {
        let handle = match lock(&self.port).as_ref() {
            Some(port) => port.try_clone()?,
            None => return Err(SerialTermError::NotConnected),
        };

        self.leases.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            port: handle,
            _count: LeaseCount(Arc::clone(self)),
        })
    }

    /// Resolve once every cloned handle has been dropped
    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.leases.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn acquire(flag: &AtomicBool) -> SerialTermResult<()> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| SerialTermError::StreamLocked)
    }
}

/// A cloned OS handle. The count drops after the handle itself is closed.
struct Lease {
    port: Box<dyn SerialPort>,
    _count: LeaseCount,
}

struct LeaseCount(Arc<DeviceInner>);

impl Drop for LeaseCount {
    fn drop(&mut self) {
        if self.0.leases.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

/// Serial port backed by the `serialport` crate
pub struct SerialDevice {
    info: PortInfo,
    inner: Arc<DeviceInner>,
}

impl SerialDevice {
    pub fn new(info: PortInfo) -> Self {
        Self {
            info,
            inner: Arc::new(DeviceInner {
                port: Mutex::new(None),
                buffer_size: AtomicUsize::new(PortConfig::default().buffer_size),
                failed: AtomicBool::new(false),
                reader_locked: AtomicBool::new(false),
                writer_locked: AtomicBool::new(false),
                leases: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    fn reader(&self) -> SerialTermResult<SerialReader> {
        if !self.readable() {
            return Err(SerialTermError::ReadFailed(
                "readable stream is not available".to_string(),
            ));
        }
        DeviceInner::acquire(&self.inner.reader_locked)?;

        match self.inner.lease() {
            Ok(lease) => Ok(SerialReader {
                inner: Arc::clone(&self.inner),
                lease: Some(lease),
                pending: None,
                buffer_size: self.inner.buffer_size.load(Ordering::SeqCst),
                released: false,
            }),
            Err(e) => {
                self.inner.reader_locked.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

fn data_bits(bits: u8) -> SerialTermResult<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        _ => Err(SerialTermError::OpenFailed(format!(
            "Invalid data bits: {}",
            bits
        ))),
    }
}

#[async_trait]
impl Port for SerialDevice {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    async fn open(&self, config: &PortConfig) -> SerialTermResult<()> {
        if self.inner.is_open() {
            return Err(SerialTermError::OpenFailed(
                "port is already open".to_string(),
            ));
        }

        let port = serialport::new(&self.info.name, config.baud_rate)
            .data_bits(data_bits(config.data_bits)?)
            .timeout(READ_POLL)
            .open()
            .map_err(|e| SerialTermError::OpenFailed(e.to_string()))?;

        self.inner
            .buffer_size
            .store(config.buffer_size, Ordering::SeqCst);
        self.inner.failed.store(false, Ordering::SeqCst);
        *lock(&self.inner.port) = Some(port);

        info!("Serial port {} opened at {} baud", self.info.name, config.baud_rate);
        Ok(())
    }

    fn readable(&self) -> bool {
        self.inner.is_open() && !self.inner.failed.load(Ordering::SeqCst)
    }

    fn writable(&self) -> bool {
        self.inner.is_open()
    }

    async fn zero_copy_reader(&self) -> SerialTermResult<Box<dyn ZeroCopyRead>> {
        Ok(Box::new(self.reader()?))
    }

    async fn chunk_reader(&self) -> SerialTermResult<Box<dyn ChunkRead>> {
        Ok(Box::new(self.reader()?))
    }

    async fn writer(&self) -> SerialTermResult<Box<dyn PortWriter>> {
        DeviceInner::acquire(&self.inner.writer_locked)?;

        match self.inner.lease() {
            Ok(lease) => Ok(Box::new(SerialWriter {
                inner: Arc::clone(&self.inner),
                lease: Some(lease),
                released: false,
            })),
            Err(e) => {
                self.inner.writer_locked.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn close(&self) -> SerialTermResult<()> {
        if self.inner.reader_locked.load(Ordering::SeqCst) {
            return Err(SerialTermError::CloseFailed(
                "readable stream is locked".to_string(),
            ));
        }

        let Some(port) = lock(&self.inner.port).take() else {
            return Err(SerialTermError::CloseFailed("port is not open".to_string()));
        };
        drop(port);

        // the OS lock on the device is held until the last cloned handle is gone
        if tokio::time::timeout(CLOSE_DRAIN, self.inner.wait_drained())
            .await
            .is_err()
        {
            warn!("Blocking I/O on {} did not drain", self.info.name);
            return Err(SerialTermError::CloseFailed(
                "blocking I/O still in flight".to_string(),
            ));
        }

        info!("Serial port {} closed", self.info.name);
        Ok(())
    }
}

type ReadReturn = (Lease, Vec<u8>, std::io::Result<usize>);

/// One blocking read on the blocking pool; the handle and buffer are handed back
fn spawn_read(mut lease: Lease, mut buf: Vec<u8>) -> JoinHandle<ReadReturn> {
    tokio::task::spawn_blocking(move || {
        let result = lease.port.read(&mut buf);
        (lease, buf, result)
    })
}

struct SerialReader {
    inner: Arc<DeviceInner>,
    lease: Option<Lease>,
    /// A read that outlived a cancelled caller; the next call picks it up
    pending: Option<JoinHandle<ReadReturn>>,
    buffer_size: usize,
    released: bool,
}

impl SerialReader {
    /// Read until data arrives, the device closes, or the read fails
    async fn fill(&mut self, buf: Vec<u8>) -> SerialTermResult<(Vec<u8>, usize, bool)> {
        let mut spare = buf;

        loop {
            if self.pending.is_none() {
                if !self.inner.is_open() {
                    return Ok((spare, 0, true));
                }
                let Some(lease) = self.lease.take() else {
                    return Ok((spare, 0, true));
                };
                self.pending = Some(spawn_read(lease, std::mem::take(&mut spare)));
            }

            let Some(task) = self.pending.as_mut() else {
                return Ok((spare, 0, true));
            };
            let joined = task.await;
            self.pending = None;

            let (lease, returned, result) =
                joined.map_err(|e| SerialTermError::ReadFailed(e.to_string()))?;
            self.lease = Some(lease);
            spare = returned;

            match result {
                Ok(0) => continue,
                Ok(n) => return Ok((spare, n, false)),
                Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    self.inner.failed.store(true, Ordering::SeqCst);
                    return Err(SerialTermError::ReadFailed(e.to_string()));
                }
            }
        }
    }

    fn unlock(&mut self) {
        if !self.released {
            self.released = true;
            // a detached read returns its lease when the blocking call finishes
            self.pending = None;
            self.lease = None;
            self.inner.reader_locked.store(false, Ordering::SeqCst);
            debug!("Serial reader released");
        }
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[async_trait]
impl ZeroCopyRead for SerialReader {
    async fn read_into(&mut self, buf: Vec<u8>) -> SerialTermResult<FilledBuffer> {
        let (buf, filled, done) = self.fill(buf).await?;
        Ok(FilledBuffer { buf, filled, done })
    }

    fn release(&mut self) {
        self.unlock();
    }
}

#[async_trait]
impl ChunkRead for SerialReader {
    async fn read(&mut self) -> SerialTermResult<Chunk> {
        let (mut data, filled, done) = self.fill(vec![0; self.buffer_size.max(1)]).await?;
        data.truncate(filled);
        Ok(Chunk { data, done })
    }

    fn release(&mut self) {
        self.unlock();
    }
}

struct SerialWriter {
    inner: Arc<DeviceInner>,
    lease: Option<Lease>,
    released: bool,
}

impl SerialWriter {
    fn unlock(&mut self) {
        if !self.released {
            self.released = true;
            self.lease = None;
            self.inner.writer_locked.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for SerialWriter {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[async_trait]
impl PortWriter for SerialWriter {
    async fn write(&mut self, data: &[u8]) -> SerialTermResult<()> {
        let mut lease = self.lease.take().ok_or(SerialTermError::NotConnected)?;
        let data = data.to_vec();

        let (lease, result) = tokio::task::spawn_blocking(move || {
            let result = lease
                .port
                .write_all(&data)
                .and_then(|_| lease.port.flush());
            (lease, result)
        })
        .await
        .map_err(|e| SerialTermError::WriteFailed(e.to_string()))?;

        self.lease = Some(lease);
        result.map_err(|e| SerialTermError::WriteFailed(e.to_string()))
    }

    fn release(&mut self) {
        self.unlock();
    }
}


#[cfg(all(test, unix))]
mod pty_tests {
    use super::*;
    use crate::core::display::MemorySink;
    use crate::core::session::{ConnectOutcome, Session, SessionState};
    use crate::domain::config::PortFilter;
    use crate::infrastructure::serial::SerialPortProvider;
    use serialport::TTYPort;

    /// A pty pair; the slave handle stays alive so the master never sees EIO
    fn pty() -> (TTYPort, TTYPort, String) {
        let (master, slave) = TTYPort::pair().expect("pty pair");
        let name = slave.name().expect("pty slave has a name");
        (master, slave, name)
    }

    fn write_master(master: &mut TTYPort, data: &[u8]) {
        master.write_all(data).unwrap();
        master.flush().unwrap();
    }

    async fn read_master(master: TTYPort, len: usize) -> (TTYPort, Vec<u8>) {
        tokio::task::spawn_blocking(move || {
            let mut master = master;
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while received.len() < len {
                match master.read(&mut buf) {
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => panic!("master read failed: {}", e),
                }
            }
            (master, received)
        })
        .await
        .unwrap()
    }

    async fn wait_for_text(sink: &MemorySink, expected: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.terminal_text() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("terminal shows {:?}", sink.terminal_text()));
    }

    async fn wait_for_reader(session: &Session) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !session.has_active_reader() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reader never became active");
    }

    fn pty_session(name: &str) -> (Arc<Session>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let session = Session::new(
            Arc::new(SerialPortProvider::new(Some(name.to_string()))),
            PortConfig::default(),
            PortFilter::default(),
            sink.clone(),
        );
        (session, sink)
    }

    #[tokio::test]
    async fn test_device_output_reaches_sink() {
        let (mut master, _slave, name) = pty();
        let (session, sink) = pty_session(&name);

        assert_eq!(session.connect().await, ConnectOutcome::Connected);
        wait_for_reader(&session).await;

        write_master(&mut master, b"hello\n");
        wait_for_text(&sink, "hello\n").await;

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!sink.console_contains("Failed to close"));
    }

    #[tokio::test]
    async fn test_writer_reaches_device() {
        let (master, _slave, name) = pty();
        let device = SerialDevice::new(PortInfo::named(&name));
        device.open(&PortConfig::default()).await.unwrap();

        let mut writer = device.writer().await.unwrap();
        writer.write(b"AT\r\n").await.unwrap();
        writer.release();
        assert!(!device.inner.writer_locked.load(Ordering::SeqCst));

        let (_master, received) = read_master(master, 4).await;
        assert!(received.starts_with(b"AT"));

        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_refused_while_reader_held() {
        let (_master, _slave, name) = pty();
        let device = SerialDevice::new(PortInfo::named(&name));
        device.open(&PortConfig::default()).await.unwrap();

        let mut reader = device.chunk_reader().await.unwrap();
        assert!(matches!(
            device.close().await,
            Err(SerialTermError::CloseFailed(_))
        ));
        assert!(device.readable());

        reader.release();
        device.close().await.unwrap();
        assert!(!device.readable());
        assert!(!device.writable());
    }

    #[tokio::test]
    async fn test_cancelled_read_does_not_block_reopen() {
        let (_master, _slave, name) = pty();
        let device = SerialDevice::new(PortInfo::named(&name));
        device.open(&PortConfig::default()).await.unwrap();

        let mut reader = device.chunk_reader().await.unwrap();
        // nothing arrives, so the read is abandoned mid blocking call
        let pending = tokio::time::timeout(Duration::from_millis(10), reader.read()).await;
        assert!(pending.is_err());
        reader.release();

        device.close().await.unwrap();
        assert_eq!(device.inner.leases.load(Ordering::SeqCst), 0);
        device.open(&PortConfig::default()).await.unwrap();
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_read_resumes_on_next_call() {
        let (mut master, _slave, name) = pty();
        let device = SerialDevice::new(PortInfo::named(&name));
        device.open(&PortConfig::default()).await.unwrap();

        let mut reader = device.chunk_reader().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(10), reader.read())
            .await
            .is_err());

        write_master(&mut master, b"late");
        let mut received = Vec::new();
        while received.len() < 4 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), reader.read())
                .await
                .expect("read stalled")
                .unwrap();
            received.extend_from_slice(&chunk.data);
        }
        assert_eq!(received, b"late");

        reader.release();
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_then_immediate_reconnect() {
        let (mut master, _slave, name) = pty();
        let (session, sink) = pty_session(&name);

        for round in 0..5 {
            assert_eq!(session.connect().await, ConnectOutcome::Connected, "round {}", round);
            wait_for_reader(&session).await;
            // let the blocking read get underway before cancelling it
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.disconnect().await;
        }

        assert_eq!(session.connect().await, ConnectOutcome::Connected);
        wait_for_reader(&session).await;
        write_master(&mut master, b"again\n");
        wait_for_text(&sink, "again\n").await;
        session.disconnect().await;

        assert!(!sink.console_contains("Failed to open port"));
        assert!(!sink.console_contains("Failed to close"));
    }
}
