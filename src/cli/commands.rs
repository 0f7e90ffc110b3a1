use crate::cli::args::{Args, Command, ConfigArgs, ConfigCommand, OpenArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::cli::terminal::{run_terminal, StdioSink, TERMINAL_HELP};
use crate::core::session::Session;
use crate::core::transport::PortProvider;
use crate::domain::config::AppConfig;
use crate::domain::error::{SerialTermError, SerialTermResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::SerialPortProvider;
use crate::ui::ControlPanel;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;

/// Execute CLI command
pub async fn execute_command(args: Args) -> SerialTermResult<()> {
    let writer = ConsoleWriter::new(args.output);

    // Load configuration using ConfigManager
    let config_manager = ConfigManager::new()?;
    let config = if let Some(config_path) = &args.config {
        config_manager.load_config_from_path(Path::new(config_path))?
    } else {
        config_manager.load_config()?
    };

    if !args.quiet {
        let level = if args.verbose {
            "debug"
        } else {
            config.global.log_level.as_str()
        };
        init_logging(level).map_err(|e| {
            SerialTermError::config(format!("Failed to initialize logging: {}", e))
        })?;
    }

    match args.command {
        Command::Ports => execute_ports_command(&writer).await,
        Command::Open(open_args) => execute_open_command(open_args, &writer, config).await,
        Command::Config(config_args) => {
            execute_config_command(config_args, &writer, &config, &config_manager)
        }
        Command::Version => {
            writer.write_message(&format!("serialterm {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

async fn execute_ports_command(writer: &ConsoleWriter) -> SerialTermResult<()> {
    let provider = SerialPortProvider::new(None);
    if !provider.is_supported() {
        return Err(SerialTermError::Unsupported);
    }

    let ports = provider.known_ports().await?;
    writer.write_ports(&ports)?;
    Ok(())
}

/// Fold command line overrides into the loaded configuration
pub fn apply_open_args(config: &mut AppConfig, args: OpenArgs) {
    if let Some(port) = args.port {
        config.port.name = Some(port);
    }
    if let Some(baud) = args.baud {
        config.port.baud_rate = baud;
    }
    if let Some(data_bits) = args.data_bits {
        config.port.data_bits = data_bits;
    }
    if let Some(buffer_size) = args.buffer_size {
        config.port.buffer_size = buffer_size;
    }
    if let Some(line_ending) = args.line_ending {
        config.port.line_ending = line_ending.into();
    }
    if args.vid.is_some() {
        config.filter.usb_vendor_id = args.vid;
    }
    if args.pid.is_some() {
        config.filter.usb_product_id = args.pid;
    }
}

async fn execute_open_command(
    args: OpenArgs,
    writer: &ConsoleWriter,
    mut config: AppConfig,
) -> SerialTermResult<()> {
    apply_open_args(&mut config, args);

    let port_config = config.port.port_config();
    port_config.validate()?;

    let provider = Arc::new(SerialPortProvider::new(config.port.name.clone()));
    let session = Session::new(
        provider,
        port_config,
        config.filter.clone(),
        Arc::new(StdioSink::new()),
    );
    let panel = ControlPanel::new(session, config.port.line_ending);

    writer.write_message(TERMINAL_HELP)?;
    run_terminal(&panel, writer, BufReader::new(tokio::io::stdin())).await
}

fn execute_config_command(
    args: ConfigArgs,
    writer: &ConsoleWriter,
    config: &AppConfig,
    config_manager: &ConfigManager,
) -> SerialTermResult<()> {
    match args.command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
        }
        ConfigCommand::Init { dir } => {
            let dir = match dir {
                Some(dir) => dir.into(),
                None => std::env::current_dir().map_err(|e| {
                    SerialTermError::config(format!("Failed to get current directory: {}", e))
                })?,
            };
            let path = config_manager.init_project_config(&dir)?;
            writer.write_message(&format!(
                "Project configuration initialized at '{}'",
                path.display()
            ))?;
        }
        ConfigCommand::Path => {
            writer.write_config_paths(
                config_manager.get_global_config_path_ref(),
                config_manager.get_project_config_path().map(|p| p.as_path()),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::LineEndingArg;
    use crate::domain::config::LineEnding;

    #[test]
    fn test_cli_overrides_config() {
        let mut config = AppConfig::default();
        config.port.name = Some("/dev/ttyUSB0".to_string());

        apply_open_args(
            &mut config,
            OpenArgs {
                port: Some("/dev/ttyACM1".to_string()),
                baud: Some(9600),
                line_ending: Some(LineEndingArg::Lf),
                vid: Some(0x2341),
                ..OpenArgs::default()
            },
        );

        assert_eq!(config.port.name.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.port.baud_rate, 9600);
        assert_eq!(config.port.line_ending, LineEnding::Lf);
        assert_eq!(config.filter.usb_vendor_id, Some(0x2341));
        assert_eq!(config.filter.usb_product_id, None);
    }

    #[test]
    fn test_missing_overrides_keep_config() {
        let mut config = AppConfig::default();
        let before = config.clone();

        apply_open_args(&mut config, OpenArgs::default());
        assert_eq!(config, before);
    }
}
