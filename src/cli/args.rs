use crate::domain::config::LineEnding;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command line arguments for SerialTerm
#[derive(Parser, Debug)]
#[command(
    name = "serialterm",
    version = env!("CARGO_PKG_VERSION"),
    about = "Interactive serial terminal",
    long_about = "Connects to a serial device, shows what it sends and forwards typed lines back to it."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports known to the system
    Ports,
    /// Open an interactive terminal on a serial port
    Open(OpenArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Terminal session arguments. Anything left out comes from the configuration.
#[derive(ClapArgs, Debug, Default)]
pub struct OpenArgs {
    /// Serial port path
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Read buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Terminator appended to sent lines
    #[arg(long, value_enum)]
    pub line_ending: Option<LineEndingArg>,

    /// USB vendor id filter (hex)
    #[arg(long, value_parser = parse_hex_id)]
    pub vid: Option<u16>,

    /// USB product id filter (hex)
    #[arg(long, value_parser = parse_hex_id)]
    pub pid: Option<u16>,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Create default project configuration
    Init {
        /// Directory to create `.serialterm/config.toml` in
        #[arg(short, long)]
        dir: Option<String>,
    },
    /// Show the configuration file locations
    Path,
}

/// Line ending argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEndingArg {
    Lf,
    Cr,
    Crlf,
}

impl From<LineEndingArg> for LineEnding {
    fn from(arg: LineEndingArg) -> Self {
        match arg {
            LineEndingArg::Lf => Self::Lf,
            LineEndingArg::Cr => Self::Cr,
            LineEndingArg::Crlf => Self::CrLf,
        }
    }
}

/// Parse a USB id given as `0x2341`, `2341` or `0X2341`
pub fn parse_hex_id(value: &str) -> Result<u16, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);

    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid USB id '{}': {}", value, e))
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0x2341"), Ok(0x2341));
        assert_eq!(parse_hex_id("0XFFFF"), Ok(0xffff));
        assert_eq!(parse_hex_id("403"), Ok(0x0403));
        assert!(parse_hex_id("0x10000").is_err());
        assert!(parse_hex_id("usb").is_err());
    }

    #[test]
    fn test_line_ending_conversion() {
        assert_eq!(LineEnding::from(LineEndingArg::Crlf), LineEnding::CrLf);
        assert_eq!(LineEnding::from(LineEndingArg::Lf), LineEnding::Lf);
    }

    #[test]
    fn test_open_defaults_are_unset() {
        let args = Args::try_parse_from(["serialterm", "open"]).unwrap();
        match args.command {
            Command::Open(open) => {
                assert!(open.port.is_none());
                assert!(open.baud.is_none());
                assert!(open.line_ending.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(args.output, OutputFormat::Text);
    }
}
