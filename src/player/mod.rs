//! Audio backend interface
//!
//! The daemon does not decode audio itself; it drives a [`Player`] that owns
//! the live play queue. [`QueuePlayer`] is the in-process backend, and the
//! [`PlaybackDriver`] keeps its queue fed from the music registry.

pub mod driver;
pub mod queue;

pub use driver::PlaybackDriver;
pub use queue::QueuePlayer;

use serde::Serialize;

use crate::music::Music;

/// Snapshot of the backend, as broadcast in PULSE packets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStatus {
    /// Length of the current track in seconds, 0 when unknown or idle
    pub duration: f64,
    #[serde(rename = "pause")]
    pub paused: bool,
    /// Playback position within the current track, in seconds
    pub position: f64,
    /// Titles of the queued tracks, current track first
    #[serde(rename = "playlist")]
    pub queue_titles: Vec<String>,
}

/// Events emitted by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The current track finished or was skipped
    TrackEnded,
}

/// Commands understood by an audio backend.
///
/// Implementations serialize their own commands; callers may share one
/// backend across every connection thread.
pub trait Player: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn seek(&self, seconds: f64);
    /// Queue a track after everything already queued
    fn append_music(&self, music: &Music);
    /// Skip the current track
    fn next(&self);
    fn status(&self) -> PlayerStatus;

    /// Periodic hook for backends that detect the end of a track by polling
    fn tick(&self) {}
}
