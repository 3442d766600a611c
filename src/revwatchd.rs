use clap::Parser;
use tracing_subscriber::EnvFilter;

use core_lib::{
    cli::DaemonArgs,
    config::parser::load_config,
    daemon::manager::{build_state, start_monitors, start_socket_listener},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = DaemonArgs::parse();
    let config = load_config(&args.config)?;
    let state = build_state(&config).await?;
    start_monitors(&state).await;

    let socket = args.socket.unwrap_or_else(|| config.socket_path());
    start_socket_listener(state, &socket).await
}
