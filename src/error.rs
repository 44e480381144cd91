//! Error types for the music daemon

use thiserror::Error;

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    #[error("Music error: {0}")]
    Music(#[from] MusicError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Music registry and playlist errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MusicError {
    #[error("Setting option {0} is not allowed")]
    OptionNotAllowed(String),

    #[error("Playlist not found: {0:?}")]
    PlaylistNotFound(String),

    #[error("Playlist already exists: {0:?}")]
    PlaylistExists(String),

    #[error("Playlist {0:?} requires a non-empty password")]
    EmptyPassword(String),

    /// No subscribed playlist has any track to offer
    #[error("No more music to play")]
    NoMoreMusic,
}

/// Wire-level errors: framing, JSON and envelope fields
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    #[error("Frame exceeds {limit} bytes without a terminator ({size} buffered)")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Expected an array of API versions")]
    NotAnArray,

    #[error("Malformed API version array (expected only unsigned ints)")]
    BadVersion,

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Packet has no integer conversation id")]
    MissingId,

    #[error("Missing or invalid field {field:?}: expected {expected}")]
    BadField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Errors raised while driving a conversation's state machine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversationError {
    /// The current state has no transition for this packet type
    #[error("state {state} got unexpected packet type {packet_type}")]
    Rejected { state: u32, packet_type: u32 },

    #[error("Malformed packet: {0}")]
    Malformed(#[from] ProtocolError),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,
}

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, Error>;
