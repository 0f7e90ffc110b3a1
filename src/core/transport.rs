use crate::domain::{
    config::{PortConfig, PortFilter},
    error::{SerialTermError, SerialTermResult},
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Identity of a selectable port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
    pub usb_vendor_id: Option<u16>,
    pub usb_product_id: Option<u16>,
}

impl PortInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            usb_vendor_id: None,
            usb_product_id: None,
        }
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.usb_vendor_id, self.usb_product_id) {
            (Some(vid), Some(pid)) => write!(f, "{} ({:04x}:{:04x})", self.name, vid, pid),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Result of a zero-copy read: the caller's buffer handed back with the filled length
#[derive(Debug)]
pub struct FilledBuffer {
    pub buf: Vec<u8>,
    pub filled: usize,
    pub done: bool,
}

/// Result of an allocating read
#[derive(Debug, Default)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub done: bool,
}

/// Host capability that hands out ports
#[async_trait]
pub trait PortProvider: Send + Sync {
    /// Whether the host offers serial ports at all
    fn is_supported(&self) -> bool {
        true
    }

    /// Ask for a device. `Ok(None)` means the selection was cancelled.
    async fn request_port(&self, filter: &PortFilter) -> SerialTermResult<Option<Arc<dyn Port>>>;

    /// Ports the host already knows about
    async fn known_ports(&self) -> SerialTermResult<Vec<PortInfo>>;
}

/// An openable byte-stream device
#[async_trait]
pub trait Port: Send + Sync {
    fn info(&self) -> PortInfo;

    async fn open(&self, config: &PortConfig) -> SerialTermResult<()>;

    /// Whether the readable stream is present
    fn readable(&self) -> bool;

    /// Whether the writable stream is present
    fn writable(&self) -> bool;

    /// Lock the readable stream with a reader that fills caller-supplied buffers
    async fn zero_copy_reader(&self) -> SerialTermResult<Box<dyn ZeroCopyRead>> {
        Err(SerialTermError::ZeroCopyUnsupported)
    }

    /// Lock the readable stream with a reader that allocates each chunk
    async fn chunk_reader(&self) -> SerialTermResult<Box<dyn ChunkRead>>;

    /// Lock the writable stream
    async fn writer(&self) -> SerialTermResult<Box<dyn PortWriter>>;

    /// Close the device. Fails with `CloseFailed` while a reader is held; a held writer does not block it.
    async fn close(&self) -> SerialTermResult<()>;
}

#[async_trait]
pub trait ZeroCopyRead: Send {
    async fn read_into(&mut self, buf: Vec<u8>) -> SerialTermResult<FilledBuffer>;

    fn release(&mut self);
}

#[async_trait]
pub trait ChunkRead: Send {
    async fn read(&mut self) -> SerialTermResult<Chunk>;

    fn release(&mut self);
}

#[async_trait]
pub trait PortWriter: Send {
    async fn write(&mut self, data: &[u8]) -> SerialTermResult<()>;

    fn release(&mut self);
}
