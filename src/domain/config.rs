use crate::domain::error::{SerialTermError, SerialTermResult};
use serde::{Deserialize, Serialize};

/// SerialTerm configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Port settings applied on connect
    #[serde(default)]
    pub port: PortSettings,
    /// Device selection filter
    #[serde(default)]
    pub filter: PortFilter,
}

/// Global configuration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Port settings as they appear in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Preferred port name; when absent the port is picked from the filter
    #[serde(default)]
    pub name: Option<String>,
    /// Target data rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bit width
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Terminator appended to every line sent from the UI
    #[serde(default)]
    pub line_ending: LineEnding,
}

/// Configuration record handed to `Port::open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub buffer_size: usize,
}

/// USB identity filter used when requesting a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFilter {
    #[serde(default)]
    pub usb_vendor_id: Option<u16>,
    #[serde(default)]
    pub usb_product_id: Option<u16>,
}

/// Line terminator appended by the send control
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    Cr,
    #[default]
    CrLf,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_buffer_size() -> usize {
    255
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            name: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            buffer_size: default_buffer_size(),
            line_ending: LineEnding::default(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        PortSettings::default().port_config()
    }
}

impl PortSettings {
    /// Extract the open-time configuration record
    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            buffer_size: self.buffer_size,
        }
    }
}

impl PortConfig {
    pub fn validate(&self) -> SerialTermResult<()> {
        if self.baud_rate == 0 {
            return Err(SerialTermError::config("baud rate must be greater than zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(SerialTermError::config(format!(
                "Invalid data bits: {}",
                self.data_bits
            )));
        }
        if self.buffer_size == 0 {
            return Err(SerialTermError::config("buffer size must be greater than zero"));
        }
        Ok(())
    }
}

impl PortFilter {
    pub fn is_empty(&self) -> bool {
        self.usb_vendor_id.is_none() && self.usb_product_id.is_none()
    }

    /// A port matches when every id the filter names is equal
    pub fn matches(&self, vendor_id: Option<u16>, product_id: Option<u16>) -> bool {
        let vendor_ok = self.usb_vendor_id.map_or(true, |v| vendor_id == Some(v));
        let product_ok = self.usb_product_id.map_or(true, |p| product_id == Some(p));
        vendor_ok && product_ok
    }
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::Cr => b"\r",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

impl std::fmt::Display for LineEnding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineEnding::Lf => write!(f, "lf"),
            LineEnding::Cr => write!(f, "cr"),
            LineEnding::CrLf => write!(f, "crlf"),
        }
    }
}
