//! Connection multiplexer
//!
//! Accepts connections on the control socket and gives each one a bounded
//! outbound queue, a writer task that drains it, and a reader task that
//! feeds the frame decoder and dispatches into the controller. Nothing here
//! ever blocks on a slow client: a full outbound queue drops the message for
//! that client alone.

use crate::controller::Controller;
use crate::shared::Shared;
use fabrikd_core::error::{Result, ServerError};
use fabrikd_core::proto::{FrameDecoder, ServerMessage, PROTOCOL_VERSION};
use fabrikd_core::state::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;

/// Outbound message sink, keyed by connection
///
/// The seam between the controller and the socket layer; tests substitute a
/// recording sink.
pub trait Outbound: Send + Sync {
    /// Queue a message for delivery to one connection
    ///
    /// Unknown connections and full queues are absorbed here; the caller
    /// never blocks and never fails.
    fn enqueue(&self, id: ConnectionId, msg: ServerMessage);
}

/// Socket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control socket path
    pub socket_path: PathBuf,
    /// Per-connection outbound queue depth
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/fabrikd.sock"),
            outbound_queue: 256,
        }
    }
}

/// Live connections and their outbound queues
#[derive(Default)]
pub struct Registry {
    conns: Mutex<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        self.conns.lock().insert(id, tx);
    }

    fn remove(&self, id: ConnectionId) {
        self.conns.lock().remove(&id);
    }

    /// Drop every connection's queue, ending its writer task
    fn clear(&self) {
        self.conns.lock().clear();
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    /// Whether no connections are live
    pub fn is_empty(&self) -> bool {
        self.conns.lock().is_empty()
    }
}

impl Outbound for Registry {
    fn enqueue(&self, id: ConnectionId, msg: ServerMessage) {
        let tx = match self.conns.lock().get(&id) {
            Some(tx) => tx.clone(),
            // Teardown raced the sender; nothing to deliver to
            None => return,
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(%id, action = msg.action(), "outbound queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// The control-socket server
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    controller: Arc<Controller>,
    shared: Shared,
    shutdown: Arc<watch::Sender<bool>>,
    next_id: AtomicU64,
}

impl Server {
    /// Wire up a server over its collaborators
    pub fn new(
        config: ServerConfig,
        registry: Arc<Registry>,
        controller: Arc<Controller>,
        shared: Shared,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            config,
            registry,
            controller,
            shared,
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    /// Accept connections until shutdown, then tear everything down
    ///
    /// The socket file is removed on clean exit. A stale file from an
    /// unclean previous run is removed before binding.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let path = self.config.socket_path.clone();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path).map_err(|e| ServerError::Bind {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(path = %path.display(), "control socket listening");

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.clone().spawn_connection(stream),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                _ = shutdown.changed() => break,
            }
        }

        // Final pass: the server is stopping, so connections are closed
        // without the per-connection unsubscribe step.
        self.registry.clear();
        drop(listener);
        let _ = std::fs::remove_file(&path);
        tracing::info!("server stopped");
        Ok(())
    }

    fn spawn_connection(self: Arc<Self>, stream: UnixStream) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel(self.config.outbound_queue);

        self.registry.insert(id, tx);
        self.registry.enqueue(
            id,
            ServerMessage::ServerInfo {
                version: PROTOCOL_VERSION.to_string(),
                pid: std::process::id(),
            },
        );
        tracing::info!(%id, "client connected");

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg.encode() {
                    Ok(bytes) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(%id, error = %e, "dropping unencodable message"),
                }
            }
        });

        let server = self.clone();
        tokio::spawn(async move {
            server.read_connection(id, read_half).await;
            let stopping = *server.shutdown.borrow();
            server.teardown(id, stopping);
        });
    }

    async fn read_connection(&self, id: ConnectionId, mut read_half: OwnedReadHalf) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                read = read_half.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!(%id, "client disconnected");
                        return;
                    }
                    Ok(n) => {
                        decoder.feed(&buf[..n]);
                        loop {
                            match decoder.try_next() {
                                Ok(Some(frame)) => self.controller.dispatch(id, frame),
                                Ok(None) => break,
                                Err(e) => {
                                    tracing::warn!(%id, error = %e, "unrecoverable stream, closing connection");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "read failed");
                        return;
                    }
                },
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Unregister a connection; a departing client never stays subscribed
    fn teardown(&self, id: ConnectionId, stopping: bool) {
        self.registry.remove(id);
        if !stopping {
            self.shared.lock().subs.remove_everywhere(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_to_unknown_connection_is_absorbed() {
        let registry = Registry::new();
        registry.enqueue(ConnectionId(77), ServerMessage::PrintStarted);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let registry = Registry::new();
        let id = ConnectionId(1);
        let (tx, mut rx) = mpsc::channel(1);
        registry.insert(id, tx);

        registry.enqueue(id, ServerMessage::PrintStarted);
        registry.enqueue(id, ServerMessage::PrintStopped);

        // Only the first message fit; the second was dropped, not queued
        assert_eq!(rx.recv().await.unwrap().action(), "print_started");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_teardown_removes_connection() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert(ConnectionId(5), tx);
        assert_eq!(registry.len(), 1);
        registry.remove(ConnectionId(5));
        assert!(registry.is_empty());
    }
}
