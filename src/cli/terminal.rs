use crate::cli::output::{OutputWriter, SessionStatus};
use crate::core::display::DisplaySink;
use crate::domain::error::{SerialTermError, SerialTermResult};
use crate::ui::{ControlPanel, ToggleAction, ToggleResult};
use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

/// Device output to stdout, session messages to stderr
#[derive(Debug, Default)]
pub struct StdioSink;

impl StdioSink {
    pub fn new() -> Self {
        Self
    }
}

impl DisplaySink for StdioSink {
    fn terminal(&self, text: &str) {
        let mut out = io::stdout().lock();
        // a closed stdout leaves nothing useful to report to
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn console(&self, message: &str) {
        info!(target: "serialterm::console", "{}", message);
        eprintln!("[{}]", message);
    }
}

/// One line typed at the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    Toggle,
    Connect,
    Disconnect,
    Status,
    Quit,
    Send(String),
    Unknown(String),
}

impl TerminalInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if !trimmed.starts_with('/') {
            return Self::Send(trimmed.to_string());
        }

        match trimmed.trim() {
            "/toggle" => Self::Toggle,
            "/connect" => Self::Connect,
            "/disconnect" => Self::Disconnect,
            "/status" => Self::Status,
            "/quit" | "/exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

pub const TERMINAL_HELP: &str =
    "Type to send. Commands: /toggle /connect /disconnect /status /quit";

/// Run the interactive terminal until `/quit`, end of input or Ctrl+C.
///
/// The session is connected on entry and always disconnected on exit.
pub async fn run_terminal<R>(
    panel: &ControlPanel,
    writer: &impl OutputWriter,
    input: R,
) -> SerialTermResult<()>
where
    R: AsyncBufRead + Unpin,
{
    if panel.startup() {
        report_toggle(panel, writer, panel.toggle().await)?;
    }

    let result = read_commands(panel, writer, input).await;

    panel.session().disconnect().await;
    result
}

async fn read_commands<R>(
    panel: &ControlPanel,
    writer: &impl OutputWriter,
    input: R,
) -> SerialTermResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                None
            }
        };

        let Some(line) = line else {
            return Ok(());
        };

        match TerminalInput::parse(&line) {
            TerminalInput::Toggle => {
                report_toggle(panel, writer, panel.toggle().await)?;
            }
            TerminalInput::Connect => {
                if panel.controls().toggle == ToggleAction::Connect {
                    report_toggle(panel, writer, panel.toggle().await)?;
                } else {
                    writer.write_error("Already connected")?;
                }
            }
            TerminalInput::Disconnect => {
                if panel.controls().toggle == ToggleAction::Disconnect {
                    report_toggle(panel, writer, panel.toggle().await)?;
                } else {
                    writer.write_error("Not connected")?;
                }
            }
            TerminalInput::Status => {
                let session = panel.session();
                writer.write_status(&SessionStatus::new(
                    session.state(),
                    session.port_info(),
                    session.reader_strategy(),
                ))?;
            }
            TerminalInput::Quit => return Ok(()),
            TerminalInput::Send(text) => match panel.send(&text).await {
                Ok(()) => {}
                Err(SerialTermError::NotConnected) => {
                    writer.write_error(&SerialTermError::NotConnected.to_string())?;
                }
                // already on the console
                Err(e) => debug!("Send failed: {}", e),
            },
            TerminalInput::Unknown(command) => {
                writer.write_error(&format!("Unknown command {}. {}", command, TERMINAL_HELP))?;
            }
        }
    }
}

fn report_toggle(
    panel: &ControlPanel,
    writer: &impl OutputWriter,
    result: ToggleResult,
) -> SerialTermResult<()> {
    if result == ToggleResult::Disabled {
        writer.write_error(&format!(
            "Connect/disconnect unavailable while {}",
            if panel.is_supported() {
                panel.session().state().to_string()
            } else {
                "serial ports are unsupported".to_string()
            }
        ))?;
    }
    Ok(())
}
