// CLI module - Command line interface
pub mod args;
pub mod commands;
pub mod output;
pub mod terminal;

pub use args::{Args, Command, OutputFormat};
pub use commands::execute_command;
pub use output::OutputWriter;
pub use terminal::{run_terminal, StdioSink};
