//! Client connection handling
//!
//! Each client gets a dedicated thread running [`Connection::run`]. The loop
//! reads with a bounded wait, splits frames, negotiates the API version and
//! then routes packets to conversations by ID. A connection never tears
//! itself down: when it stops it posts its ID on the server's wish-to-die
//! channel and the server joins and drops its [`ConnectionHandle`].

use crossbeam_channel::Sender;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::ServerConfig;
use crate::constants::RECV_BUFFER_SIZE;
use crate::conversation::{Conversation, Session, Status, TrackedConversation};
use crate::error::{NetworkError, ProtocolError};
use crate::music::MusicRegistry;
use crate::network::ClientSession;
use crate::player::Player;
use crate::protocol::{self, negotiate, FrameDecoder};

/// Sequential connection identifier assigned by the server
pub type ConnectionId = u64;

/// Protocol state of one client
pub struct Connection {
    id: ConnectionId,
    decoder: FrameDecoder,
    /// Negotiated API version, 0 until negotiated
    version: u32,
    conversations: HashMap<i64, TrackedConversation>,
    last_active: Instant,
    session: ClientSession,
    settings: ServerConfig,
    stop: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(id: ConnectionId, session: ClientSession, settings: ServerConfig) -> Self {
        let stop = session.stop_flag();
        Self {
            id,
            decoder: FrameDecoder::new(),
            version: 0,
            conversations: HashMap::new(),
            last_active: Instant::now(),
            session,
            settings,
            stop,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of conversations awaiting further packets
    pub fn pending_conversations(&self) -> usize {
        self.conversations.len()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Feed received bytes, handling every frame they complete
    pub fn handle_bytes(&mut self, data: &[u8]) {
        self.decoder.extend(data);
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_frame(&frame);
            if self.stop_requested() {
                return;
            }
        }

        if let Err(e) = self.decoder.check_limit() {
            tracing::warn!(conn = self.id, "Dropping client: {}", e);
            self.request_stop();
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let packet: Value = match serde_json::from_slice(frame) {
            Ok(packet) => packet,
            Err(e) => {
                let e = ProtocolError::MalformedJson(e.to_string());
                tracing::warn!(conn = self.id, "Dropping frame: {}", e);
                return;
            }
        };
        tracing::trace!(conn = self.id, "Received {}", packet);
        self.last_active = Instant::now();

        if self.version == 0 {
            self.negotiate(&packet);
        } else {
            self.dispatch(&packet);
        }
    }

    fn negotiate(&mut self, packet: &Value) {
        match negotiate(packet) {
            Ok(version) => {
                self.session.send_packet(json!(version));
                if version == 0 {
                    tracing::info!(conn = self.id, "No common API version with {}", packet);
                    self.request_stop();
                } else {
                    tracing::debug!(conn = self.id, "Negotiated API version {}", version);
                    self.version = version;
                }
            }
            Err(e) => tracing::warn!(conn = self.id, "Ignoring negotiation packet: {}", e),
        }
    }

    fn dispatch(&mut self, packet: &Value) {
        let id = match protocol::conversation_id(packet) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(conn = self.id, "Dropping packet: {}", e);
                return;
            }
        };

        if id < 0 {
            // One-shot: lives for this packet only
            if let Some(mut conv) = protocol::create_conversation(self.version, id) {
                conv.handle_packet(&mut self.session, packet);
            }
            return;
        }

        if !self.conversations.contains_key(&id) {
            let Some(conv) = protocol::create_conversation(self.version, id) else {
                tracing::error!(conn = self.id, "No conversation for API version {}", self.version);
                return;
            };
            tracing::debug!(conn = self.id, conv = id, "New conversation");
            self.conversations.insert(id, TrackedConversation::new(conv));
        }

        if let Some(conv) = self.conversations.get_mut(&id) {
            if conv.handle_packet(&mut self.session, packet) == Status::Finished {
                tracing::debug!(conn = self.id, conv = id, "Conversation finished");
                self.conversations.remove(&id);
            }
        }
    }

    /// Discard conversations idle for too long, telling the client
    pub fn sweep_conversations(&mut self) {
        let timeout = self.settings.conversation_timeout();
        let expired: Vec<i64> = self
            .conversations
            .iter()
            .filter(|(_, conv)| conv.has_timed_out(timeout))
            .map(|(&id, _)| id)
            .collect();

        for id in expired {
            if let Some(mut conv) = self.conversations.remove(&id) {
                tracing::debug!(conn = self.id, conv = id, "Conversation timed out");
                conv.send_timeout(&mut self.session);
            }
        }
    }

    pub fn has_timed_out(&self) -> bool {
        self.last_active.elapsed() > self.settings.connection_timeout()
    }

    fn poll(&mut self, stream: &mut TcpStream, buf: &mut [u8]) {
        match stream.read(buf) {
            Ok(0) => {
                tracing::info!(conn = self.id, "{}", NetworkError::ConnectionClosed);
                self.request_stop();
            }
            Ok(n) => self.handle_bytes(&buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                tracing::info!(conn = self.id, "Receive failed: {}", e);
                self.request_stop();
            }
        }

        self.sweep_conversations();
        if self.has_timed_out() {
            tracing::info!(conn = self.id, "Connection timed out");
            self.request_stop();
        }
    }

    /// Serve the client until a stop is requested, then ask the server to
    /// reap this connection.
    pub fn run(mut self, mut stream: TcpStream, running: Arc<AtomicBool>, wish_tx: Sender<ConnectionId>) {
        tracing::debug!(conn = self.id, "Connection up and running");
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while !self.stop_requested() {
            let iteration = panic::catch_unwind(AssertUnwindSafe(|| self.poll(&mut stream, &mut buf)));
            if iteration.is_err() {
                tracing::error!(conn = self.id, "Connection loop panicked, stopping");
                self.request_stop();
            }
        }

        running.store(false, Ordering::SeqCst);
        self.session.unsubscribe();
        tracing::debug!(conn = self.id, "Connection finished running");

        if wish_tx.send(self.id).is_err() {
            tracing::debug!(conn = self.id, "Server gone before reaping");
        }
    }
}

/// Server-side handle to a connection thread
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Start serving an accepted client on its own thread
    pub fn spawn(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<MusicRegistry>,
        player: Arc<dyn Player>,
        settings: &ServerConfig,
        wish_tx: Sender<ConnectionId>,
    ) -> std::io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(settings.poll_interval()))?;
        // Shared with the clone: a client that stops reading cannot stall us
        stream.set_write_timeout(Some(settings.poll_interval()))?;
        let writer = stream.try_clone()?;

        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let session = ClientSession::new(id, Box::new(writer), registry, player, stop.clone());
        let connection = Connection::new(id, session, settings.clone());

        let running_for_loop = running.clone();
        let handle = thread::Builder::new()
            .name(format!("conn-{}", id))
            .spawn(move || connection.run(stream, running_for_loop, wish_tx))?;

        Ok(Self {
            id,
            peer,
            stop,
            running,
            thread_handle: Some(handle),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop the connection and wait for its thread
    pub fn stop(&mut self) {
        self.request_stop();

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!(conn = self.id, "Connection thread panicked");
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
