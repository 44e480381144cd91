//! Network subsystem: TCP listeners, per-client connections and the server
//! owning them

pub mod connection;
pub mod listener;
pub mod server;
pub mod session;

pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use listener::bind_listeners;
pub use server::{Server, ServerHandle};
pub use session::ClientSession;
