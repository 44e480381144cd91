//! Headless in-process audio backend
//!
//! Keeps the play queue, pause flag and playback clock the way an external
//! player would, without producing sound. Useful as the default backend and
//! as the reference behavior for real ones.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

use crate::music::Music;
use crate::player::{Player, PlayerEvent, PlayerStatus};

const EVENT_CAPACITY: usize = 64;

struct QueueState {
    /// Current track first
    queue: VecDeque<Music>,
    paused: bool,
    /// Position at the last pause/seek/track change
    position_base: f64,
    /// Set while the clock is running
    resumed_at: Option<Instant>,
}

impl QueueState {
    fn position(&self) -> f64 {
        match self.resumed_at {
            Some(at) => self.position_base + at.elapsed().as_secs_f64(),
            None => self.position_base,
        }
    }

    /// Make the queue front the current track and restart the clock
    fn start_current(&mut self) {
        self.position_base = self
            .queue
            .front()
            .and_then(|m| option_secs(m, "start"))
            .unwrap_or(0.0);
        self.resumed_at = match (self.queue.is_empty(), self.paused) {
            (false, false) => Some(Instant::now()),
            _ => None,
        };
    }
}

fn option_secs(music: &Music, key: &str) -> Option<f64> {
    music.option(key).and_then(|v| v.parse::<f64>().ok())
}

/// In-memory player implementation
pub struct QueuePlayer {
    state: Mutex<QueueState>,
    events: Sender<PlayerEvent>,
}

impl QueuePlayer {
    /// Create a player and the receiving end of its event channel
    pub fn new() -> (Self, Receiver<PlayerEvent>) {
        let (events, event_rx) = bounded(EVENT_CAPACITY);
        let player = Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                paused: false,
                position_base: 0.0,
                resumed_at: None,
            }),
            events,
        };
        (player, event_rx)
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn end_current(&self, state: &mut QueueState) {
        if let Some(music) = state.queue.pop_front() {
            tracing::debug!(url = music.url(), "Track ended");
            state.start_current();
            if let Err(e) = self.events.try_send(PlayerEvent::TrackEnded) {
                tracing::debug!("Dropping end-of-track event: {}", e);
            }
        }
    }
}

impl Player for QueuePlayer {
    fn play(&self) {
        tracing::trace!("Unpausing player");
        let mut state = self.state.lock();
        if state.paused {
            state.paused = false;
            if !state.queue.is_empty() {
                state.resumed_at = Some(Instant::now());
            }
        }
    }

    fn pause(&self) {
        tracing::trace!("Pausing player");
        let mut state = self.state.lock();
        if !state.paused {
            state.position_base = state.position();
            state.resumed_at = None;
            state.paused = true;
        }
    }

    fn seek(&self, seconds: f64) {
        tracing::trace!(seconds, "Seeking");
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            return;
        }
        state.position_base = seconds.max(0.0);
        if state.resumed_at.is_some() {
            state.resumed_at = Some(Instant::now());
        }
    }

    fn append_music(&self, music: &Music) {
        tracing::trace!(url = music.url(), options = %music.options(), "Queuing");
        let mut state = self.state.lock();
        state.queue.push_back(music.clone());
        if state.queue.len() == 1 {
            state.start_current();
        }
    }

    fn next(&self) {
        let mut state = self.state.lock();
        self.end_current(&mut state);
    }

    /// Ends the current track once its `stop` option is reached
    fn tick(&self) {
        let mut state = self.state.lock();
        let stop = state.queue.front().and_then(|m| option_secs(m, "stop"));
        if let Some(stop) = stop {
            if state.position() >= stop {
                self.end_current(&mut state);
            }
        }
    }

    fn status(&self) -> PlayerStatus {
        let state = self.state.lock();
        let duration = state
            .queue
            .front()
            .and_then(|m| option_secs(m, "stop"))
            .map(|stop| {
                let start = state.queue.front().and_then(|m| option_secs(m, "start"));
                stop - start.unwrap_or(0.0)
            })
            .unwrap_or(0.0);

        PlayerStatus {
            duration,
            paused: state.paused,
            position: state.position(),
            queue_titles: state.queue.iter().map(|m| m.url().to_string()).collect(),
        }
    }
}
