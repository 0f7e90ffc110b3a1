//! Display sink and the byte-to-text mapping applied to device output.

use std::sync::{Mutex, PoisonError};

/// Receiver for everything the session shows to the user
pub trait DisplaySink: Send + Sync {
    /// Decoded device output
    fn terminal(&self, text: &str);

    /// Lifecycle, status and error messages
    fn console(&self, message: &str);
}

/// Maps raw bytes to display text.
///
/// Each byte becomes the character with the same code point. CR, LF and the
/// CR LF pair each render as a single line break, including a pair split
/// across two chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending_cr: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut text = String::with_capacity(bytes.len());

        for &b in bytes {
            match b {
                b'\r' => {
                    text.push('\n');
                    self.pending_cr = true;
                }
                b'\n' => {
                    if !self.pending_cr {
                        text.push('\n');
                    }
                    self.pending_cr = false;
                }
                _ => {
                    text.push(char::from(b));
                    self.pending_cr = false;
                }
            }
        }

        text
    }
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    terminal: Mutex<String>,
    console: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All terminal text received so far
    pub fn terminal_text(&self) -> String {
        self.terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Terminal text split into display lines
    pub fn terminal_lines(&self) -> Vec<String> {
        self.terminal_text().split('\n').map(str::to_string).collect()
    }

    pub fn console_messages(&self) -> Vec<String> {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn console_contains(&self, needle: &str) -> bool {
        self.console_messages().iter().any(|m| m.contains(needle))
    }
}

impl DisplaySink for MemorySink {
    fn terminal(&self, text: &str) {
        self.terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    fn console(&self, message: &str) {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}
