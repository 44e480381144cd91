//! Playback driver: refills the backend queue from subscribed playlists
//!
//! Runs in its own thread, waking on the backend's end-of-track events and
//! on a fixed tick, so an idle queue is refilled as soon as someone
//! subscribes to a non-empty playlist.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::MusicError;
use crate::music::MusicRegistry;
use crate::player::{Player, PlayerEvent};

/// Feeds the player from the registry whenever its queue runs dry
pub struct PlaybackDriver {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackDriver {
    /// Spawn the driver thread
    pub fn start(
        registry: Arc<MusicRegistry>,
        player: Arc<dyn Player>,
        events: Receiver<PlayerEvent>,
        tick: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("playback-driver".to_string())
            .spawn(move || {
                tracing::debug!("Playback driver up and running");
                while running_for_loop.load(Ordering::Relaxed) {
                    match events.recv_timeout(tick) {
                        Ok(PlayerEvent::TrackEnded) => {
                            tracing::trace!("Backend reported end of track");
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            tracing::warn!("Player event channel closed, stopping driver");
                            break;
                        }
                    }

                    player.tick();
                    refill(&registry, player.as_ref());
                }
                tracing::debug!("Playback driver finished running");
            })?;

        Ok(Self {
            running,
            thread_handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Playback driver thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Queue the next registry track if the backend has nothing left to play.
///
/// Returns whether a track was queued.
pub fn refill(registry: &MusicRegistry, player: &dyn Player) -> bool {
    if !player.status().queue_titles.is_empty() {
        return false;
    }

    match registry.next_music() {
        Ok(music) => {
            tracing::debug!(url = music.url(), "Queuing next track");
            player.append_music(&music);
            true
        }
        Err(MusicError::NoMoreMusic) => false,
        Err(e) => {
            tracing::error!("Failed to pick next track: {}", e);
            false
        }
    }
}
