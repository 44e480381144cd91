//! Conversation state-machine framework
//!
//! A conversation is a possibly multi-packet exchange identified by a
//! client-chosen ID. Each protocol version describes its conversations as a
//! [`TransitionTable`]: one row per state, each row mapping a packet type to
//! the transition function handling it. The framework only looks up and
//! runs transitions; replies and domain effects happen inside them.

use serde_json::Value;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::error::ConversationError;
use crate::music::MusicRegistry;
use crate::player::Player;

/// Outcome of handling one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The exchange is over, the conversation can be discarded
    Finished,
    /// More packets are expected
    Continuing,
    /// The packet was rejected (bad state or malformed)
    Unexpected,
}

/// What a conversation may act upon: the owning connection's playback
/// session and the shared daemon state behind it.
pub trait Session {
    /// Send a packet to the client
    fn send_packet(&mut self, packet: Value);

    fn registry(&self) -> &MusicRegistry;

    fn player(&self) -> &dyn Player;

    /// Currently selected playlist
    fn playlist_name(&self) -> &str;

    fn subscribed(&self) -> bool;

    /// Select a playlist, dropping any subscription to the previous one
    fn select_playlist(&mut self, name: &str);

    fn subscribe(&mut self);

    fn unsubscribe(&mut self);
}

/// A transition: handles a packet and yields the status and the next state
pub type Transition<C, S> =
    fn(&mut C, &mut dyn Session, &Value) -> Result<(Status, S), ConversationError>;

/// Fixed table of legal transitions, indexed by state then packet type
pub struct TransitionTable<K, S, C> {
    rows: Vec<HashMap<K, Transition<C, S>>>,
}

impl<K, S, C> TransitionTable<K, S, C>
where
    K: Copy + Eq + Hash,
    S: Copy + Into<u32>,
{
    /// Create a table with no bound transitions
    pub fn new(state_count: usize) -> Self {
        Self {
            rows: (0..state_count).map(|_| HashMap::new()).collect(),
        }
    }

    /// Bind a transition for `key` packets received in `state`
    pub fn bind(mut self, state: S, key: K, transition: Transition<C, S>) -> Self {
        let row = state.into() as usize;
        if row >= self.rows.len() {
            self.rows.resize_with(row + 1, HashMap::new);
        }
        self.rows[row].insert(key, transition);
        self
    }

    pub fn get(&self, state: S, key: K) -> Option<Transition<C, S>> {
        self.rows
            .get(state.into() as usize)
            .and_then(|row| row.get(&key))
            .copied()
    }

    /// Packet types accepted in `state`
    pub fn accepted(&self, state: S) -> Vec<K> {
        self.rows
            .get(state.into() as usize)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// A conversation driven by a static transition table
pub trait StateMachine: Sized + 'static {
    type State: Copy + Into<u32>;
    type PacketType: Copy + Eq + Hash + Into<u32>;

    fn transitions() -> &'static TransitionTable<Self::PacketType, Self::State, Self>;

    fn state(&self) -> Self::State;

    fn set_state(&mut self, state: Self::State);

    /// Run the transition bound to `(current state, key)`.
    ///
    /// Fails with [`ConversationError::Rejected`] when the current state has
    /// no transition for `key`. On success the conversation moves to the
    /// state returned by the transition.
    fn process_state_machine(
        &mut self,
        key: Self::PacketType,
        session: &mut dyn Session,
        packet: &Value,
    ) -> Result<Status, ConversationError> {
        let state = self.state();
        let transition = Self::transitions()
            .get(state, key)
            .ok_or(ConversationError::Rejected {
                state: state.into(),
                packet_type: key.into(),
            })?;

        let (status, next) = transition(self, session, packet)?;
        self.set_state(next);
        Ok(status)
    }
}

/// Version-independent view of a conversation, as held by a connection
pub trait Conversation: Send {
    fn id(&self) -> i64;

    /// Handle one packet; rejections are reported to the client here
    fn handle_packet(&mut self, session: &mut dyn Session, packet: &Value) -> Status;

    /// Tell the client this conversation timed out
    fn send_timeout(&mut self, session: &mut dyn Session);
}

/// A conversation plus its idle timer
pub struct TrackedConversation {
    inner: Box<dyn Conversation>,
    last_active: Instant,
}

impl TrackedConversation {
    pub fn new(inner: Box<dyn Conversation>) -> Self {
        Self {
            inner,
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> i64 {
        self.inner.id()
    }

    /// Handle a packet; only a continuing exchange refreshes the timer
    pub fn handle_packet(&mut self, session: &mut dyn Session, packet: &Value) -> Status {
        let status = self.inner.handle_packet(session, packet);
        if status == Status::Continuing {
            self.last_active = Instant::now();
        }
        status
    }

    pub fn has_timed_out(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() > timeout
    }

    pub fn send_timeout(&mut self, session: &mut dyn Session) {
        self.inner.send_timeout(session);
    }
}
