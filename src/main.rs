// SerialTerm - Interactive serial terminal
use clap::Parser;
use serialterm::cli::{execute_command, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    execute_command(args).await?;
    Ok(())
}
