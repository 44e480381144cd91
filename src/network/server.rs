//! TCP server owning every connection
//!
//! The accept loop is the only place connections are created or destroyed.
//! Between accept rounds it waits briefly on the wish-to-die channel and
//! joins the connections that asked to be reaped.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::constants::ACCEPT_INTERVAL;
use crate::error::NetworkError;
use crate::music::MusicRegistry;
use crate::network::{bind_listeners, ConnectionHandle, ConnectionId};
use crate::player::Player;

/// Cloneable stop switch for a running [`Server`]
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Ask the accept loop to shut down
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Server {
    listeners: Vec<TcpListener>,
    settings: ServerConfig,
    registry: Arc<MusicRegistry>,
    player: Arc<dyn Player>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    next_id: ConnectionId,
    wish_tx: Sender<ConnectionId>,
    wish_rx: Receiver<ConnectionId>,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listeners on the configured port
    pub fn bind(
        settings: &ServerConfig,
        registry: Arc<MusicRegistry>,
        player: Arc<dyn Player>,
    ) -> Result<Self, NetworkError> {
        let listeners = bind_listeners(settings.port)?;
        let (wish_tx, wish_rx) = unbounded();

        Ok(Self {
            listeners,
            settings: settings.clone(),
            registry,
            player,
            connections: HashMap::new(),
            next_id: 0,
            wish_tx,
            wish_rx,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: self.running.clone(),
        }
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until stopped, then stop and join every connection
    pub fn run(&mut self) {
        tracing::info!("Server up and running");
        while self.running.load(Ordering::SeqCst) {
            self.poll_once();
        }
        self.shutdown();
        tracing::info!("Server finished running");
    }

    /// One accept round followed by one reaping round.
    ///
    /// Returns the number of connections reaped.
    pub fn poll_once(&mut self) -> usize {
        self.accept_pending();
        self.reap()
    }

    fn accept_pending(&mut self) {
        for index in 0..self.listeners.len() {
            loop {
                match self.listeners[index].accept() {
                    Ok((stream, peer)) => {
                        let id = self.next_id;
                        self.next_id += 1;

                        match ConnectionHandle::spawn(
                            id,
                            stream,
                            peer,
                            self.registry.clone(),
                            self.player.clone(),
                            &self.settings,
                            self.wish_tx.clone(),
                        ) {
                            Ok(handle) => {
                                tracing::info!(conn = id, "Accepted connection from {}", peer);
                                self.connections.insert(id, handle);
                            }
                            Err(e) => {
                                tracing::error!(conn = id, "Failed to start connection: {}", e)
                            }
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        let e = NetworkError::AcceptFailed(e.to_string());
                        tracing::error!("{}", e);
                        break;
                    }
                }
            }
        }
    }

    fn reap(&mut self) -> usize {
        let Ok(first) = self.wish_rx.recv_timeout(ACCEPT_INTERVAL) else {
            return 0;
        };

        let wishes: Vec<ConnectionId> = std::iter::once(first)
            .chain(self.wish_rx.try_iter())
            .collect();

        let mut reaped = 0;
        for id in wishes {
            match self.connections.remove(&id) {
                Some(handle) => {
                    tracing::info!(conn = id, "Closing connection from {}", handle.peer());
                    drop(handle);
                    reaped += 1;
                }
                None => tracing::warn!(conn = id, "Reap requested for unknown connection"),
            }
        }
        reaped
    }

    fn shutdown(&mut self) {
        let live = self.connections.values().filter(|h| h.is_running()).count();
        tracing::info!("Stopping {} connection(s), {} still running", self.connections.len(), live);
        for handle in self.connections.values() {
            handle.request_stop();
        }
        for (_, mut handle) in self.connections.drain() {
            handle.stop();
        }
        // Connections post their IDs on the way out
        while self.wish_rx.try_recv().is_ok() {}
    }
}
