use crate::cli::args::OutputFormat;
use crate::core::session::{ReaderStrategy, SessionState};
use crate::core::transport::PortInfo;
use crate::domain::config::AppConfig;
use serde::Serialize;
use std::io;
use std::path::Path;

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortInfo]) -> Result<(), OutputError>;
    fn write_config(&self, config: &AppConfig) -> Result<(), OutputError>;
    fn write_config_paths(&self, global: &Path, project: Option<&Path>) -> Result<(), OutputError>;
    fn write_status(&self, status: &SessionStatus) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::SerialTermError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Snapshot of a terminal session for `/status`
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub port: Option<PortInfo>,
    pub reader: Option<String>,
}

impl SessionStatus {
    pub fn new(state: SessionState, port: Option<PortInfo>, reader: Option<ReaderStrategy>) -> Self {
        Self {
            state,
            port,
            reader: reader.map(|r| r.to_string()),
        }
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

fn format_usb_id(id: Option<u16>) -> String {
    id.map(|v| format!("{:04x}", v))
        .unwrap_or_else(|| "-".to_string())
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortInfo]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    println!("No serial ports found");
                    return Ok(());
                }
                println!("Available serial ports:");
                for port in ports {
                    println!(
                        "  {:<20} {:<6} {:<6} {}",
                        port.name,
                        format_usb_id(port.usb_vendor_id),
                        format_usb_id(port.usb_product_id),
                        port.description
                    );
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(ports)?);
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &AppConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                print!("{}", toml::to_string_pretty(config)?);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
        }
        Ok(())
    }

    fn write_config_paths(&self, global: &Path, project: Option<&Path>) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Global configuration: {}", global.display());
                match project {
                    Some(path) => println!("Project configuration: {}", path.display()),
                    None => println!("Project configuration: (none)"),
                }
            }
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "global": global,
                    "project": project,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }

    fn write_status(&self, status: &SessionStatus) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("State: {}", status.state);
                if let Some(port) = &status.port {
                    println!("Port: {}", port);
                }
                if let Some(reader) = &status.reader {
                    println!("Reader: {}", reader);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(status)?);
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}
