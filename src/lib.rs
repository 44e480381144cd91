//! # musicbotd
//!
//! Shared-queue music daemon: clients connect over TCP, negotiate a protocol
//! version, manage playlists, subscribe to the shared play queue and control
//! playback.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       Server (accept thread)                          │
//! │   listeners (IPv6 dual-stack + IPv4) ──► accept ──► Connection N      │
//! │   wish-to-die channel ◄─────────────── connection threads on exit     │
//! └──────────┬───────────────────────────────────────────────────────────┘
//!            │ one thread per client
//!            ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Connection: socket ─► FrameDecoder ─► JSON ─► negotiation | dispatch  │
//! │   conversations: id ─► V1Conversation (transition table)             │
//! │   session: selected playlist, subscribed flag, reply writer          │
//! └──────────┬───────────────────────────────┬───────────────────────────┘
//!            │ registry lock                 │ backend commands
//!            ▼                               ▼
//! ┌──────────────────────────┐   ┌────────────────────────────────────────┐
//! │ MusicRegistry             │   │ Player (QueuePlayer)                   │
//! │  dedup'd tracks           │◄──│  PlaybackDriver thread: on end of      │
//! │  playlists + shuffle      │   │  track, next_music() ─► append_music() │
//! └──────────────────────────┘   └────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod music;
pub mod network;
pub mod player;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default TCP port
    pub const DEFAULT_PORT: u16 = 1939;

    /// Byte terminating every JSON frame on the wire
    pub const FRAME_TERMINATOR: u8 = 0;

    /// Idle time after which a connection is stopped
    pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Idle time after which a pending conversation is discarded
    pub const CONVERSATION_TIMEOUT: Duration = Duration::from_secs(3);

    /// Bounded wait of a connection's read loop
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Bounded wait of the server's accept loop
    pub const ACCEPT_INTERVAL: Duration = Duration::from_millis(10);

    /// Tick of the playback driver
    pub const PLAYBACK_TICK: Duration = Duration::from_millis(500);

    /// Pending connection queue length of the listening sockets
    pub const LISTEN_BACKLOG: i32 = 32;

    /// Size of a single socket read
    pub const RECV_BUFFER_SIZE: usize = 8192;

    /// Largest frame accepted from a client, terminator excluded
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// Name of the always-present playlist receiving every track
    pub const GLOBAL_PLAYLIST: &str = "";

    /// Protocol versions this server speaks (never contains 0)
    pub const SUPPORTED_VERSIONS: [u32; 1] = [1];
}
