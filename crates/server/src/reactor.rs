//! Single-threaded event loop.
//!
//! [`ServerState`] owns the listener, the one peer connection, the verb
//! module and the reply channel. [`ServerState::run_once`] waits for a single
//! event:
//!
//! - the listener is readable (only while no peer is connected)
//! - the peer is readable
//! - a completion queued a reply
//!
//! and handles it to the end before returning. Nothing here is shared
//! across threads, so no state is locked.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use corelib::{HarnessModule, ProcId, ServerModule, Status};
use wire::io::send_message;
use wire::{FrameReader, ReadEvent, Reply};

use crate::auth::{Authenticator, SharedSecret};
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, Outgoing};
use crate::error::{FatalSessionError, ServerError};
use crate::handshake::Handshake;

/// The established peer.
struct Connection {
    stream: UnixStream,
    proc: ProcId,
    reader: FrameReader,
}

/// Lifecycle of the peer connection.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Phase {
    Handshaking,
    Established,
    Closed,
}

enum Event {
    Accepted(io::Result<UnixStream>),
    Readable(io::Result<()>),
    Reply(Option<Outgoing>),
}

pub struct ServerState<M: ServerModule = HarnessModule> {
    config: ServerConfig,
    socket_path: PathBuf,
    listener: UnixListener,
    authenticator: Box<dyn Authenticator>,
    module: M,
    dispatcher: Dispatcher,
    replies: mpsc::UnboundedReceiver<Outgoing>,
    peer: Option<Connection>,
    phase: Option<Phase>,
    running: bool,
}

impl ServerState<HarnessModule> {
    /// Server with the single-server verb module and a shared-secret
    /// authenticator, both taken from `config`.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let module = HarnessModule::new(config.module.clone());
        let authenticator = Box::new(SharedSecret::new(config.credential.clone()));
        Self::bind(config, module, authenticator)
    }
}

impl<M: ServerModule> ServerState<M> {
    /// Bind the listening socket. A socket file left behind by an earlier
    /// run under the same session id is replaced; any other file at that
    /// path is left alone and binding fails.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        config: ServerConfig,
        module: M,
        authenticator: Box<dyn Authenticator>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let socket_path = config.socket_path();

        if let Err(source) = remove_stale_socket(&socket_path) {
            return Err(ServerError::Bind {
                path: socket_path,
                source,
            });
        }

        let listener = UnixListener::bind(&socket_path).map_err(|source| ServerError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        tracing::info!(path = %socket_path.display(), session = %config.session, "listening");

        let (dispatcher, replies) = Dispatcher::new();
        Ok(Self {
            config,
            socket_path,
            listener,
            authenticator,
            module,
            dispatcher,
            replies,
            peer: None,
            phase: None,
            running: true,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Identity of the connected peer, if any.
    pub fn peer(&self) -> Option<&ProcId> {
        self.peer.as_ref().map(|conn| &conn.proc)
    }

    /// Phase of the current or most recent connection; `None` before the
    /// first accept.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Process events until the peer goes away or a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        while self.running {
            self.run_once().await?;
        }
        tracing::info!("event loop finished");
        Ok(())
    }

    /// Wait for one event and handle it.
    pub async fn run_once(&mut self) -> Result<(), ServerError> {
        let accepting = self.peer.is_none();
        let event = {
            let listener = &self.listener;
            let peer = self.peer.as_ref();
            let replies = &mut self.replies;
            tokio::select! {
                res = listener.accept(), if accepting => {
                    Event::Accepted(res.map(|(stream, _)| stream))
                }
                res = peer_readable(peer) => Event::Readable(res),
                out = replies.recv() => Event::Reply(out),
            }
        };

        match event {
            Event::Accepted(Ok(stream)) => self.on_accept(stream).await,
            Event::Accepted(Err(err)) => Err(ServerError::Accept(err)),
            Event::Readable(Ok(())) => self.on_readable().await,
            Event::Readable(Err(err)) => self.lose_peer(wire::Error::from_io(err)),
            Event::Reply(Some(out)) => {
                self.send_reply(out).await?;
                self.flush_replies().await
            }
            Event::Reply(None) => {
                tracing::warn!("reply channel closed");
                self.running = false;
                Ok(())
            }
        }
    }

    async fn on_accept(&mut self, mut stream: UnixStream) -> Result<(), ServerError> {
        let pid = stream.peer_cred().ok().and_then(|cred| cred.pid());
        tracing::debug!(pid, "accepted connection");
        self.phase = Some(Phase::Handshaking);

        let mut handshake = Handshake::new(
            self.authenticator.as_ref(),
            self.config.max_payload,
            self.config.handshake_timeout(),
        );
        let proc = match handshake.run(&mut stream).await {
            Ok(proc) => proc,
            Err(err) => {
                tracing::error!(pid, error = %err, "handshake failed");
                self.phase = Some(Phase::Closed);
                return Err(FatalSessionError::Handshake(err).into());
            }
        };

        tracing::info!(proc = %proc, pid, "peer connected");
        self.phase = Some(Phase::Established);
        self.peer = Some(Connection {
            stream,
            proc,
            reader: FrameReader::new(self.config.max_payload),
        });
        Ok(())
    }

    /// Drain every complete frame, then write the replies they produced.
    async fn on_readable(&mut self) -> Result<(), ServerError> {
        loop {
            let Some(conn) = self.peer.as_mut() else {
                return Ok(());
            };
            match conn.reader.poll_read(&conn.stream) {
                Ok(ReadEvent::WouldBlock) => break,
                Ok(ReadEvent::Malformed(err)) => {
                    tracing::warn!(
                        proc = %conn.proc,
                        error = %err,
                        "dropping message with malformed header"
                    );
                }
                Ok(ReadEvent::Frame(msg)) => {
                    self.dispatcher.dispatch(&mut self.module, &conn.proc, msg);
                }
                Err(err) => return self.lose_peer(err),
            }
        }
        self.flush_replies().await
    }

    /// The peer connection failed with `err`.
    ///
    /// A close between frames is an ordinary disconnect. Anything else is a
    /// failed payload transfer, which ends the process in strict mode.
    fn lose_peer(&mut self, err: wire::Error) -> Result<(), ServerError> {
        let proc = self.peer.as_ref().map(|conn| conn.proc.to_string()).unwrap_or_default();
        match err {
            wire::Error::Unreachable => {
                tracing::info!(proc = %proc, "peer closed the connection");
                self.close_peer();
                Ok(())
            }
            err if self.config.strict => {
                tracing::error!(proc = %proc, error = %err, "payload transfer failed");
                self.close_peer();
                Err(FatalSessionError::PayloadTransfer { proc, source: err }.into())
            }
            err => {
                tracing::warn!(
                    proc = %proc,
                    error = %err,
                    "payload transfer failed, treating as disconnect"
                );
                self.close_peer();
                Ok(())
            }
        }
    }

    /// Deregister the peer, then close its stream.
    fn close_peer(&mut self) {
        let Some(conn) = self.peer.take() else {
            return;
        };
        self.module.peer_disconnected(&conn.proc);

        let mut dropped = 0usize;
        while self.replies.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(proc = %conn.proc, dropped, "discarded replies for departed peer");
        }

        self.phase = Some(Phase::Closed);
        drop(conn);
        self.running = false;
    }

    async fn flush_replies(&mut self) -> Result<(), ServerError> {
        while let Ok(out) = self.replies.try_recv() {
            self.send_reply(out).await?;
        }
        Ok(())
    }

    async fn send_reply(&mut self, out: Outgoing) -> Result<(), ServerError> {
        let Some(conn) = self.peer.as_mut() else {
            tracing::debug!(tag = out.tag, "no peer, dropping reply");
            return Ok(());
        };

        let msg = match out.reply.to_message(out.tag) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(
                    tag = out.tag,
                    verb = ?out.verb,
                    error = %err,
                    "cannot encode reply"
                );
                match Reply::status_only(Status::Error).to_message(out.tag) {
                    Ok(msg) => msg,
                    Err(_) => return Ok(()),
                }
            }
        };

        tracing::trace!(
            tag = out.tag,
            verb = ?out.verb,
            status = %out.reply.status,
            "sending reply"
        );
        match send_message(&mut conn.stream, &msg).await {
            Ok(()) => Ok(()),
            Err(err) => self.lose_peer(err),
        }
    }

    /// Remove the socket file. Consumes the server; the peer, if any, is
    /// closed first.
    pub fn shutdown(mut self) -> Result<(), ServerError> {
        self.close_peer();
        let path = self.socket_path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed socket");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ServerError::Teardown(err)),
        }
    }
}

/// Remove `path` if it is a socket. A missing path is fine; anything else
/// that is not a socket is refused.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !meta.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }
    std::fs::remove_file(path)?;
    tracing::debug!(path = %path.display(), "removed stale socket");
    Ok(())
}

/// Resolves when the established peer is readable; never resolves without
/// one.
async fn peer_readable(peer: Option<&Connection>) -> io::Result<()> {
    match peer {
        Some(conn) => conn.stream.readable().await,
        None => std::future::pending().await,
    }
}
