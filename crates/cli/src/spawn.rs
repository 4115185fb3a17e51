//! Launching the peer process.

use std::io;
use std::path::Path;
use tokio::process::{Child, Command};

use server::{CREDENTIAL_ENV, NAMESPACE_ENV, RANK_ENV, URI_ENV};

/// Everything the peer needs to find and authenticate to the server.
#[derive(Debug)]
pub struct PeerLaunch<'a> {
    pub command: &'a str,
    pub uri: &'a Path,
    pub namespace: &'a str,
    pub rank: u32,
    pub credential: &'a str,
}

/// Start `launch.command` through `sh -c` with the connection details in
/// its environment.
pub fn spawn_peer(launch: &PeerLaunch<'_>) -> io::Result<Child> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(format!("exec {}", launch.command))
        .env(URI_ENV, launch.uri)
        .env(NAMESPACE_ENV, launch.namespace)
        .env(RANK_ENV, launch.rank.to_string())
        .env(CREDENTIAL_ENV, launch.credential)
        .kill_on_drop(true)
        .spawn()?;
    tracing::info!(pid = child.id(), command = launch.command, "spawned peer");
    Ok(child)
}

/// Wait for the peer to exit, killing it first when `kill` is set.
pub async fn reap(mut child: Child, kill: bool) {
    if kill {
        if let Err(err) = child.start_kill() {
            tracing::warn!(error = %err, "cannot kill peer");
        }
    }
    match child.wait().await {
        Ok(status) => tracing::info!(%status, "peer exited"),
        Err(err) => tracing::warn!(error = %err, "cannot reap peer"),
    }
}
