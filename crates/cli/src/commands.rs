//! Command implementations.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use corelib::{Info, ProcId};
use server::{Client, ServerConfig, ServerState};

use crate::config::{Action, ClientArgs, CliConfig, ServeArgs};
use crate::spawn::{self, PeerLaunch};

/// Outcome of a command: the process exit code.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CommandResult {
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success() -> Self {
        Self { exit_code: 0 }
    }
}

pub trait Command {
    fn execute(&self) -> Result<CommandResult>;
}

impl CliConfig {
    /// Initialise logging and run the selected action.
    pub fn run(self) -> Result<CommandResult> {
        init_tracing(self.verbose);
        match &self.action {
            Action::Serve(args) => args.execute(),
            Action::Client(args) => args.execute(),
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start runtime")
}

impl Command for ServeArgs {
    fn execute(&self) -> Result<CommandResult> {
        let config = self.server_config()?;
        let exit_code = runtime()?.block_on(serve(config, self.exec.as_deref(), &self.namespace))?;
        Ok(CommandResult { exit_code })
    }
}

/// Serve one session and compute the exit code.
///
/// Graceful shutdown, a failed handshake, a fatal payload transfer and a
/// peer that cannot be spawned all exit with 0. A failed teardown exits
/// with that error's code.
async fn serve(config: ServerConfig, exec: Option<&str>, namespace: &str) -> Result<i32> {
    let credential = config.credential.clone();
    let mut server = ServerState::from_config(config)?;

    let peer = match exec {
        Some(command) => {
            let launch = PeerLaunch {
                command,
                uri: server.socket_path(),
                namespace,
                rank: 0,
                credential: &credential,
            };
            match spawn::spawn_peer(&launch) {
                Ok(child) => Some(child),
                Err(err) => {
                    tracing::error!(command, error = %err, "cannot spawn peer");
                    return Ok(match server.shutdown() {
                        Ok(()) => 0,
                        Err(err) => err.exit_code(),
                    });
                }
            }
        }
        None => None,
    };

    let outcome = server.run().await;
    let mut exit_code = match &outcome {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "session ended");
            err.exit_code()
        }
    };

    if let Some(child) = peer {
        let kill = outcome.as_ref().err().map_or(false, |err| err.is_fatal_session());
        spawn::reap(child, kill).await;
    }

    if let Err(err) = server.shutdown() {
        tracing::error!(error = %err, "teardown failed");
        exit_code = err.exit_code();
    }
    Ok(exit_code)
}

impl Command for ClientArgs {
    fn execute(&self) -> Result<CommandResult> {
        runtime()?.block_on(smoke(self))?;
        Ok(CommandResult::success())
    }
}

/// Publish one key, read it back, fence, finalize.
async fn smoke(args: &ClientArgs) -> Result<()> {
    let uri = args.uri()?;
    let proc = ProcId::new(args.namespace()?, args.rank()?)?;
    let mut client = Client::connect(&uri, &args.credential()?, proc.clone())
        .await
        .with_context(|| format!("connecting to {}", uri.display()))?;
    println!("connected to {} as {}", uri.display(), proc);

    let status = client
        .publish(vec![Info::new(args.key.clone(), args.value.clone())])
        .await?;
    println!("publish {}={}: {}", args.key, args.value, status);

    let (status, slots) = client.lookup(&[args.key.as_str()]).await?;
    match slots.first().and_then(Option::as_ref) {
        Some(found) => println!(
            "lookup {}: {} ({:?}, owner {})",
            args.key, status, found.value, found.proc
        ),
        None => println!("lookup {}: {}", args.key, status),
    }

    let (status, _) = client.fence(Vec::new()).await?;
    println!("fence: {}", status);

    if !args.no_finalize {
        println!("finalize: {}", client.finalize().await?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir, session: &str) -> ServerConfig {
        ServerConfig {
            session: session.to_owned(),
            runtime_dir: dir.path().to_owned(),
            ..ServerConfig::default()
        }
    }

    fn peer_proc() -> ProcId {
        ProcId::new("job", 0).unwrap()
    }

    // `serve` binds on its first poll, so the client side of each join
    // finds the socket already in place.

    #[tokio::test]
    async fn test_serve_graceful_disconnect_exits_zero() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "c1");
        let path = config.socket_path();
        let client_path = path.clone();

        let (code, ()) = tokio::join!(serve(config, Some("sleep 0"), "job"), async move {
            let mut client = Client::connect(&client_path, "T35T", peer_proc()).await.unwrap();
            client.fence(Vec::new()).await.unwrap();
        });

        assert_eq!(code.unwrap(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_serve_rejected_credential_kills_peer_and_exits_zero() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "c2");
        let path = config.socket_path();
        let client_path = path.clone();

        // The spawned peer never exits by itself; finishing inside the
        // timeout shows it was killed and reaped.
        let session = async move {
            tokio::join!(serve(config, Some("sleep 300"), "job"), async move {
                Client::connect(&client_path, "wrong", peer_proc()).await.is_err()
            })
        };
        let (code, rejected) = tokio::time::timeout(Duration::from_secs(30), session)
            .await
            .unwrap();

        assert!(rejected);
        assert_eq!(code.unwrap(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_serve_without_peer_command() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "c3");
        let client_path = config.socket_path();

        let (code, ()) = tokio::join!(serve(config, None, "job"), async move {
            let client = Client::connect(&client_path, "T35T", peer_proc()).await.unwrap();
            drop(client);
        });
        assert_eq!(code.unwrap(), 0);
    }
}
