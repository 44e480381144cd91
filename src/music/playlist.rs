//! Password-gated playlist with shuffle-without-replacement selection

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::MusicError;

/// A named list of track IDs with its own shuffle state.
///
/// Tracks are served in epochs: within one epoch every track is returned
/// exactly once, in uniformly random order. The shuffle is a lazy
/// Fisher-Yates over `tracks`: the prefix `tracks[..remaining]` holds the
/// tracks not yet served this epoch, the suffix holds the served ones.
#[derive(Debug)]
pub struct Playlist<Id> {
    password: String,
    tracks: Vec<Id>,
    rng: StdRng,
    /// Number of tracks left before the next re-shuffle
    remaining: usize,
    subscribers: usize,
}

impl<Id: Copy> Playlist<Id> {
    pub fn new(password: impl Into<String>) -> Self {
        Self::with_rng(password, StdRng::from_entropy())
    }

    /// Create a playlist with a deterministic shuffle order
    pub fn with_seed(password: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(password, StdRng::seed_from_u64(seed))
    }

    fn with_rng(password: impl Into<String>, rng: StdRng) -> Self {
        Self {
            password: password.into(),
            tracks: Vec::new(),
            rng,
            remaining: 0,
            subscribers: 0,
        }
    }

    pub fn check_password(&self, password: &str) -> bool {
        self.password == password
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Id] {
        &self.tracks
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
    }

    /// Whether this playlist can supply the next track to playback
    pub fn is_subscribed(&self) -> bool {
        self.subscribers > 0 && !self.is_empty()
    }

    /// Append a track.
    ///
    /// Mid-epoch, the new track is moved into the unplayed prefix so it is
    /// served in the current epoch rather than the next one.
    pub fn push(&mut self, id: Id) {
        self.tracks.push(id);
        if self.remaining > 0 {
            let last = self.tracks.len() - 1;
            self.tracks.swap(self.remaining, last);
            self.remaining += 1;
        }
    }

    /// Draw the next track of the current epoch, starting a new one if needed
    pub fn next_music(&mut self) -> Result<Id, MusicError> {
        if self.is_empty() {
            return Err(MusicError::NoMoreMusic);
        }

        if self.remaining == 0 {
            self.remaining = self.tracks.len();
        }

        self.remaining -= 1;
        let picked = self.rng.gen_range(0..=self.remaining);
        self.tracks.swap(picked, self.remaining);
        Ok(self.tracks[self.remaining])
    }

    pub fn subscribe(&mut self) {
        self.subscribers += 1;
    }

    pub fn unsubscribe(&mut self) {
        self.subscribers = self.subscribers.saturating_sub(1);
    }
}
