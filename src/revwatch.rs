use clap::Parser;

use core_lib::cli::{Cli, client::handle_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    handle_command(&cli).await
}
