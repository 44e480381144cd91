//! Music model, playlist engine and registry

pub mod playlist;
pub mod registry;
pub mod track;

pub use playlist::Playlist;
pub use registry::{MusicId, MusicRegistry};
pub use track::{Music, ALLOWED_OPTIONS};
