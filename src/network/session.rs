//! Per-connection playback session

use serde_json::Value;
use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::GLOBAL_PLAYLIST;
use crate::conversation::Session;
use crate::error::NetworkError;
use crate::music::MusicRegistry;
use crate::network::ConnectionId;
use crate::player::Player;
use crate::protocol::encode_frame;

/// Playback state of one client and the way back to it
pub struct ClientSession {
    conn: ConnectionId,
    writer: Box<dyn Write + Send>,
    registry: Arc<MusicRegistry>,
    player: Arc<dyn Player>,
    /// Selected playlist
    playlist: String,
    subscribed: bool,
    /// Raised when the client can no longer be written to
    stop: Arc<AtomicBool>,
}

impl ClientSession {
    pub fn new(
        conn: ConnectionId,
        writer: Box<dyn Write + Send>,
        registry: Arc<MusicRegistry>,
        player: Arc<dyn Player>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            conn,
            writer,
            registry,
            player,
            playlist: GLOBAL_PLAYLIST.to_string(),
            subscribed: false,
            stop,
        }
    }

    /// Flag shared with the owning connection loop
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }
}

impl Session for ClientSession {
    fn send_packet(&mut self, packet: Value) {
        if self.stop.load(Ordering::SeqCst) {
            tracing::trace!(conn = self.conn, "Stopping, not sending {}", packet);
            return;
        }
        tracing::trace!(conn = self.conn, "Sending {}", packet);
        let frame = encode_frame(&packet);
        let result = self
            .writer
            .write_all(&frame)
            .and_then(|()| self.writer.flush());

        if let Err(e) = result {
            let kind = e.kind();
            let e = NetworkError::SendFailed(e.to_string());
            match kind {
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                    tracing::info!(conn = self.conn, "Client went away: {}", e);
                }
                ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                    tracing::warn!(conn = self.conn, "Client is not reading its replies: {}", e);
                }
                _ => tracing::error!(conn = self.conn, "{}", e),
            }
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn registry(&self) -> &MusicRegistry {
        &self.registry
    }

    fn player(&self) -> &dyn Player {
        self.player.as_ref()
    }

    fn playlist_name(&self) -> &str {
        &self.playlist
    }

    fn subscribed(&self) -> bool {
        self.subscribed
    }

    fn select_playlist(&mut self, name: &str) {
        self.unsubscribe();
        tracing::debug!(conn = self.conn, "Selected playlist {:?}", name);
        self.playlist = name.to_string();
    }

    fn subscribe(&mut self) {
        if self.subscribed {
            return;
        }
        match self.registry.subscribe(&self.playlist) {
            Ok(()) => self.subscribed = true,
            Err(e) => tracing::error!(conn = self.conn, "Failed to subscribe: {}", e),
        }
    }

    fn unsubscribe(&mut self) {
        if !self.subscribed {
            return;
        }
        if let Err(e) = self.registry.unsubscribe(&self.playlist) {
            tracing::error!(conn = self.conn, "Failed to unsubscribe: {}", e);
        }
        self.subscribed = false;
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::player::QueuePlayer;
    use parking_lot::Mutex;

    /// Writer whose output stays inspectable after being boxed
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Counts write attempts, each one timing out
    #[derive(Clone, Default)]
    struct StalledPeer(Arc<Mutex<usize>>);

    impl Write for StalledPeer {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            *self.0.lock() += 1;
            Err(ErrorKind::WouldBlock.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn recording_session() -> (ClientSession, SharedBuffer) {
        let output = SharedBuffer::default();
        let session = ClientSession::new(
            0,
            Box::new(output.clone()),
            Arc::new(MusicRegistry::new()),
            Arc::new(QueuePlayer::new().0),
            Arc::new(AtomicBool::new(false)),
        );
        (session, output)
    }

    /// Decode every frame written so far
    pub(crate) fn sent_packets(output: &SharedBuffer) -> Vec<Value> {
        let data = output.0.lock();
        let mut frames: Vec<&[u8]> = data.split(|&b| b == 0).collect();
        assert_eq!(frames.pop(), Some(&[][..]), "output must end with a terminator");
        frames
            .into_iter()
            .map(|f| serde_json::from_slice(f).unwrap())
            .collect()
    }

    #[test]
    fn test_send_appends_terminator() {
        let (mut session, output) = recording_session();
        session.send_packet(serde_json::json!({"type": 0, "id": 1, "code": 0}));
        session.send_packet(serde_json::json!(1));

        assert_eq!(
            sent_packets(&output),
            vec![serde_json::json!({"type": 0, "id": 1, "code": 0}), serde_json::json!(1)]
        );
    }

    #[test]
    fn test_broken_pipe_requests_stop() {
        let (session, _output) = recording_session();
        let mut session = ClientSession::new(
            1,
            Box::new(BrokenPipe),
            session.registry.clone(),
            session.player.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        session.send_packet(serde_json::json!(0));
        assert!(session.stop_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_timeout_stops_further_sends() {
        let (session, _output) = recording_session();
        let peer = StalledPeer::default();
        let mut session = ClientSession::new(
            2,
            Box::new(peer.clone()),
            session.registry.clone(),
            session.player.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        session.send_packet(serde_json::json!(1));
        assert!(session.stop_flag().load(Ordering::SeqCst));

        session.send_packet(serde_json::json!(2));
        assert_eq!(*peer.0.lock(), 1, "no writes once stopping");
    }

    #[test]
    fn test_reselect_unsubscribes_first() {
        let (mut session, _output) = recording_session();
        let registry = session.registry.clone();
        registry.new_playlist("rock", "p").unwrap();

        session.subscribe();
        session.subscribe();
        assert_eq!(registry.subscribers(GLOBAL_PLAYLIST), Some(1));

        session.select_playlist("rock");
        assert!(!session.subscribed());
        assert_eq!(registry.subscribers(GLOBAL_PLAYLIST), Some(0));

        session.subscribe();
        assert_eq!(registry.subscribers("rock"), Some(1));

        drop(session);
        assert_eq!(registry.subscribers("rock"), Some(0));
    }
}
