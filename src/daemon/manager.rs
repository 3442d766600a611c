use std::{
    collections::{HashMap, HashSet},
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, BufReader, split},
    net::UnixListener,
    sync::mpsc::{self, UnboundedReceiver},
};

use crate::{
    config::DaemonConfig,
    core::{
        emitter::ChannelSubscriber,
        handle::RevisionHandle,
        id::slug,
        monitor::BranchMonitor,
        state::{HeadStateStore, JsonHeadStore, state_file_for},
    },
    daemon::server::{
        DaemonRequest, DaemonResponse, DaemonState, WatchedBranch, handle_request, send_response,
    },
    git::{materialize::GitMaterializer, repo::SharedRepository},
    log::logger::Logger,
};

/// Wires every configured monitor. Branches of one repository share its lock
/// and its head file, however the repository is spelled in the config.
pub async fn build_state(config: &DaemonConfig) -> Result<Arc<DaemonState>> {
    let state_dir = config.state_dir();
    let mut repositories: HashMap<String, (SharedRepository, Arc<dyn HeadStateStore>)> =
        HashMap::new();
    let mut monitored: HashSet<(String, String)> = HashSet::new();
    let mut watches = Vec::new();

    for mc in &config.monitors {
        let source = mc.repository.trim().to_string();
        let opened = SharedRepository::open(mc.location())
            .with_context(|| format!("opening repository '{source}'"))?;
        let identity = opened.identity().to_string();

        if !monitored.insert((identity.clone(), mc.branch.trim().to_string())) {
            anyhow::bail!(
                "branch '{}' of '{identity}' is monitored twice (as '{source}')",
                mc.branch.trim()
            );
        }

        let (repository, store) = match repositories.get(&identity) {
            Some(shared) => shared.clone(),
            None => {
                let store: Arc<dyn HeadStateStore> =
                    Arc::new(JsonHeadStore::open(state_file_for(&state_dir, &identity))?);
                repositories.insert(identity.clone(), (opened.clone(), Arc::clone(&store)));
                (opened, store)
            }
        };

        let log_name = format!("{}-{}", slug(repository.identity()), slug(&mc.branch));
        let logger = Logger::new(&Logger::path_for(&log_name)?).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(keep_latest(rx, logger));

        let scratch = config.scratch_root.join(slug(repository.identity()));
        let monitor = BranchMonitor::builder(mc.branch.trim(), repository)
            .store(store)
            .materializer(Box::new(GitMaterializer::new(scratch, mc.mode)))
            .subscriber(Box::new(ChannelSubscriber::new(tx)))
            .first_observation(mc.first_observation())
            .build()?;

        watches.push(WatchedBranch {
            source,
            monitor: Arc::new(monitor),
        });
    }

    Ok(Arc::new(DaemonState { watches }))
}

/// Bootstraps every monitor and processes the branch heads as they are now.
/// A failing monitor is reported and left for later notifications.
pub async fn start_monitors(state: &DaemonState) {
    for watch in &state.watches {
        let monitor = Arc::clone(&watch.monitor);
        let name = monitor.branch().to_string();
        let res = tokio::task::spawn_blocking(move || {
            monitor.bootstrap()?;
            monitor.check_latest()
        })
        .await;

        match res {
            Ok(Ok(outcome)) => tracing::info!(monitor = %name, ?outcome, "monitor started"),
            Ok(Err(e)) => tracing::error!(monitor = %name, "initial check failed: {e}"),
            Err(e) => tracing::error!(monitor = %name, "initial check panicked: {e}"),
        }
    }
}

/// Consumes published handles, keeping only the newest snapshot on disk.
pub async fn keep_latest(mut rx: UnboundedReceiver<RevisionHandle>, logger: Logger) {
    let mut current: Option<RevisionHandle> = None;

    while let Some(handle) = rx.recv().await {
        let _ = logger
            .delivered(&format!(
                "{} checked out at {}",
                handle.revision(),
                handle.path().display()
            ))
            .await;

        let Some(mut previous) = current.replace(handle) else {
            continue;
        };
        let path = previous.path().display().to_string();
        let released = tokio::task::spawn_blocking(move || previous.release()).await;
        let _ = match released {
            Ok(Ok(())) => logger.released(&path).await,
            Ok(Err(e)) => logger.error(&format!("failed to release {path}: {e}")).await,
            Err(e) => logger.error(&format!("release task failed: {e}")).await,
        };
    }
}

pub async fn start_socket_listener(state: Arc<DaemonState>, sock_path: &Path) -> Result<()> {
    if sock_path.exists() {
        std::fs::remove_file(sock_path)?;
    }

    let listener = UnixListener::bind(sock_path)?;
    std::fs::set_permissions(sock_path, std::fs::Permissions::from_mode(0o660))?;
    tracing::info!("revwatchd is listening on {}", sock_path.display());

    loop {
        let (stream, _) = listener.accept().await?;

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let (read_half, mut write_half) = split(stream);
            let mut reader = BufReader::new(read_half);
            let mut buf = String::new();
            if let Err(e) = reader.read_line(&mut buf).await {
                tracing::warn!("failed to read from stream: {e}");
                return;
            }

            let response = match serde_json::from_str::<DaemonRequest>(&buf) {
                Ok(req) => handle_request(req, state).await,
                Err(e) => DaemonResponse::Error {
                    message: format!("invalid request: {e}"),
                    retryable: false,
                },
            };
            if let Err(e) = send_response(&mut write_half, &response).await {
                tracing::warn!("failed to answer client: {e}");
            }
        });
    }
}
