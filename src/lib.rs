//! SerialTerm Library
//!
//! Interactive serial terminal: a session controller that connects to a
//! serial port, streams its output to a display sink and writes user input
//! back to the device.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod ui;

pub use core::session::{ConnectOutcome, Session, SessionState};
pub use domain::config::AppConfig;
pub use domain::error::{SerialTermError, SerialTermResult};
