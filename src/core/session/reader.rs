//! Reader strategy selection and the per-reader chunk pump.

use crate::core::display::{DisplaySink, LineDecoder};
use crate::core::transport::{ChunkRead, Port, ZeroCopyRead};
use crate::domain::error::{SerialTermError, SerialTermResult};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

/// Which reader mode the transport accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReaderStrategy {
    /// Transport fills a reusable caller buffer
    ZeroCopy,
    /// Transport hands out a fresh chunk per read
    Allocating,
}

impl std::fmt::Display for ReaderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderStrategy::ZeroCopy => write!(f, "zero-copy"),
            ReaderStrategy::Allocating => write!(f, "allocating"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadStatus {
    pub filled: usize,
    pub done: bool,
}

/// A locked reader over the port's readable stream
pub(crate) enum StreamReader {
    ZeroCopy {
        reader: Box<dyn ZeroCopyRead>,
        buffer: Option<Vec<u8>>,
        capacity: usize,
        filled: usize,
    },
    Allocating {
        reader: Box<dyn ChunkRead>,
        chunk: Vec<u8>,
    },
}

impl StreamReader {
    /// Lock the readable stream, preferring zero-copy reads
    pub async fn acquire(port: &dyn Port, capacity: usize) -> SerialTermResult<Self> {
        match port.zero_copy_reader().await {
            Ok(reader) => {
                debug!("Using zero-copy reader with {} byte buffer", capacity);
                Ok(StreamReader::ZeroCopy {
                    reader,
                    buffer: None,
                    capacity: capacity.max(1),
                    filled: 0,
                })
            }
            Err(e) => {
                debug!("Zero-copy reader rejected ({}), falling back to allocating reader", e);
                let reader = port.chunk_reader().await?;
                Ok(StreamReader::Allocating {
                    reader,
                    chunk: Vec::new(),
                })
            }
        }
    }

    pub fn strategy(&self) -> ReaderStrategy {
        match self {
            StreamReader::ZeroCopy { .. } => ReaderStrategy::ZeroCopy,
            StreamReader::Allocating { .. } => ReaderStrategy::Allocating,
        }
    }

    /// Pull the next chunk; its bytes are available through `chunk()` until the next call
    pub async fn next_chunk(&mut self) -> SerialTermResult<ReadStatus> {
        match self {
            StreamReader::ZeroCopy {
                reader,
                buffer,
                capacity,
                filled,
            } => {
                *filled = 0;
                let buf = buffer
                    .take()
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| vec![0; *capacity]);
                let result = reader.read_into(buf).await?;
                *filled = result.filled.min(result.buf.len());
                *buffer = Some(result.buf);
                Ok(ReadStatus {
                    filled: *filled,
                    done: result.done,
                })
            }
            StreamReader::Allocating { reader, chunk } => {
                let next = reader.read().await?;
                *chunk = next.data;
                Ok(ReadStatus {
                    filled: chunk.len(),
                    done: next.done,
                })
            }
        }
    }

    pub fn chunk(&self) -> &[u8] {
        match self {
            StreamReader::ZeroCopy { buffer, filled, .. } => {
                buffer.as_deref().map_or(&[][..], |b| &b[..*filled])
            }
            StreamReader::Allocating { chunk, .. } => chunk,
        }
    }

    pub fn release(&mut self) {
        match self {
            StreamReader::ZeroCopy { reader, .. } => reader.release(),
            StreamReader::Allocating { reader, .. } => reader.release(),
        }
    }
}

/// Why a reader stopped
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// The stream reported completion
    StreamEnded,
    /// The session cancelled the reader
    Cancelled,
    /// A read raised an error
    Failed(SerialTermError),
}

/// Forward chunks to the sink until the stream ends, fails, or `cancel` fires.
/// The reader is always released before returning.
pub(crate) async fn pump(
    reader: &mut StreamReader,
    cancel: &mut oneshot::Receiver<()>,
    decoder: &mut LineDecoder,
    sink: &dyn DisplaySink,
) -> LoopExit {
    let exit = loop {
        let status = tokio::select! {
            biased;
            _ = &mut *cancel => None,
            status = reader.next_chunk() => Some(status),
        };

        match status {
            None => break LoopExit::Cancelled,
            Some(Ok(status)) => {
                if status.filled > 0 {
                    debug!("Received {} bytes", status.filled);
                    sink.terminal(&decoder.decode(reader.chunk()));
                }
                if status.done {
                    break LoopExit::StreamEnded;
                }
            }
            Some(Err(e)) => break LoopExit::Failed(e),
        }
    };

    reader.release();
    exit
}
