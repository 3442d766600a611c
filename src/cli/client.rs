use std::path::Path;

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

use crate::{
    cli::{Cli, builders::build_request},
    core::monitor::{MonitorStatus, Phase},
    daemon::server::{DaemonRequest, DaemonResponse},
};

pub async fn handle_command(cli: &Cli) -> Result<()> {
    let req = build_request(cli)?;
    let response = send_request(&cli.socket, &req).await?;
    print_response(&response)
}

pub async fn send_request(socket: &Path, req: &DaemonRequest) -> Result<DaemonResponse> {
    let mut stream = UnixStream::connect(socket)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect with daemon => {}", e))?;

    let json = serde_json::to_string(req)? + "\n";
    stream.write_all(json.as_bytes()).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;
    Ok(serde_json::from_str(response_line.trim())?)
}

fn print_response(response: &DaemonResponse) -> Result<()> {
    match response {
        DaemonResponse::Success(msg) => println!("✅ {msg}"),
        DaemonResponse::Error { message, retryable } => {
            let hint = if *retryable { " (retryable)" } else { "" };
            anyhow::bail!("{message}{hint}");
        }
        DaemonResponse::Status(statuses) => print_status_table(statuses),
    }
    Ok(())
}

fn print_status_table(statuses: &[MonitorStatus]) {
    println!("{:<40} {:<20} {:<12} {:<10}", "REPOSITORY", "BRANCH", "PHASE", "HEAD");
    for s in statuses {
        let phase = match s.phase {
            Phase::Uninitialized => "starting",
            Phase::Idle => "idle",
            Phase::Processing => "processing",
        };
        let head = s.head.as_ref().map_or("-", |h| h.short());
        println!(
            "{:<40} {:<20} {:<12} {:<10}",
            s.branch.repository, s.branch.branch, phase, head
        );
    }
}
