//! API version 1
//!
//! Packets are JSON objects carrying a numeric `type` and the conversation
//! `id`. Replies echo the `id`. Playlist selection is the only multi-packet
//! exchange: selecting an unknown playlist asks for a password, and the
//! following PASSWORD packet creates it.

use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::conversation::{Conversation, Session, StateMachine, Status, TransitionTable};
use crate::error::{ConversationError, MusicError, ProtocolError};
use crate::music::Music;
use crate::protocol::{bool_field, f64_field, str_field, u32_field};

/// Packet types sent by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ClientPacketType {
    Status = 0,
    /// Heartbeat
    Pulse,
    /// Password for authentication or playlist creation
    Password,
    AuthReq,
    UserList,
    PlList,
    PlSel,
    PlDel,
    /// (Un)subscription to the selected playlist
    PlSub,
    MusList,
    /// Music addition (to the playlist, possibly to the queue as well)
    MusAdd,
    MusImport,
    MusReorder,
    MusDel,
    MusSkip,
    VolSet,
    PosSet,
    Pause,
}

impl ClientPacketType {
    const ALL: [ClientPacketType; 18] = [
        Self::Status,
        Self::Pulse,
        Self::Password,
        Self::AuthReq,
        Self::UserList,
        Self::PlList,
        Self::PlSel,
        Self::PlDel,
        Self::PlSub,
        Self::MusList,
        Self::MusAdd,
        Self::MusImport,
        Self::MusReorder,
        Self::MusDel,
        Self::MusSkip,
        Self::VolSet,
        Self::PosSet,
        Self::Pause,
    ];
}

impl TryFrom<u32> for ClientPacketType {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        Self::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl From<ClientPacketType> for u32 {
    fn from(value: ClientPacketType) -> u32 {
        value as u32
    }
}

/// Packet types sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ServerPacketType {
    /// Response to a request (OK, etc)
    Status = 0,
    /// Player status report
    Pulse,
    AuthSalt,
    UserList,
    PlList,
    MusList,
}

/// Conversation states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum State {
    None = 0,
    Auth,
    /// Waiting for the password of a playlist to create
    PlSel,
    PlDel,
}

impl State {
    pub const COUNT: usize = 4;
}

impl From<State> for u32 {
    fn from(value: State) -> u32 {
        value as u32
    }
}

/// Codes of STATUS packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    /// Input packet itself was malformed
    Rejected,
    /// Internal error occurred during processing
    Error,
    Timeout,
    /// Packet was rejected by the state machine
    Unexpected,
    Perms,
    BadPass,
    NotFound,
}

type Step = Result<(Status, State), ConversationError>;

/// A version 1 conversation
pub struct V1Conversation {
    id: i64,
    state: State,
    /// Playlist awaiting a password to be created
    pending_playlist: Option<String>,
}

impl V1Conversation {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            state: State::None,
            pending_playlist: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn send(&self, session: &mut dyn Session, kind: ServerPacketType, mut body: Map<String, Value>) {
        body.insert("type".to_string(), json!(kind as u32));
        body.insert("id".to_string(), json!(self.id));
        session.send_packet(Value::Object(body));
    }

    fn send_status(&self, session: &mut dyn Session, code: StatusCode, msg: Option<&str>) {
        let mut body = Map::new();
        body.insert("code".to_string(), json!(code as u32));
        if let Some(msg) = msg {
            body.insert("msg".to_string(), json!(msg));
        }
        self.send(session, ServerPacketType::Status, body);
    }

    fn done(&self, session: &mut dyn Session) -> Step {
        self.send_status(session, StatusCode::Ok, None);
        Ok((Status::Finished, State::None))
    }

    fn on_pulse(&mut self, session: &mut dyn Session, _: &Value) -> Step {
        let status = session.player().status();
        let body = match serde_json::to_value(status) {
            Ok(Value::Object(body)) => body,
            _ => Map::new(),
        };
        self.send(session, ServerPacketType::Pulse, body);
        Ok((Status::Finished, State::None))
    }

    fn on_playlist_select(&mut self, session: &mut dyn Session, packet: &Value) -> Step {
        let name = str_field(packet, "name")?;
        if session.registry().playlist_exists(name) {
            session.select_playlist(name);
            return self.done(session);
        }

        self.send_status(
            session,
            StatusCode::NotFound,
            Some("Please enter a password to create the playlist with"),
        );
        self.pending_playlist = Some(name.to_string());
        Ok((Status::Continuing, State::PlSel))
    }

    fn on_password(&mut self, session: &mut dyn Session, packet: &Value) -> Step {
        let password = str_field(packet, "pass")?;
        let Some(name) = self.pending_playlist.clone() else {
            self.send_status(session, StatusCode::Error, Some("No playlist awaiting a password"));
            return Ok((Status::Finished, State::None));
        };

        match session.registry().new_playlist(&name, password) {
            Ok(()) => {
                session.select_playlist(&name);
                self.pending_playlist = None;
                self.done(session)
            }
            Err(MusicError::EmptyPassword(_)) => {
                self.send_status(
                    session,
                    StatusCode::BadPass,
                    Some("Playlist password cannot be empty"),
                );
                Ok((Status::Continuing, State::PlSel))
            }
            Err(e) => {
                tracing::error!(conv = self.id, "Failed to create playlist: {}", e);
                self.send_status(session, StatusCode::Error, Some(&e.to_string()));
                Ok((Status::Finished, State::None))
            }
        }
    }

    fn on_subscribe(&mut self, session: &mut dyn Session, packet: &Value) -> Step {
        if bool_field(packet, "sub")? {
            session.subscribe();
        } else {
            session.unsubscribe();
        }
        self.done(session)
    }

    fn on_music_add(&mut self, session: &mut dyn Session, packet: &Value) -> Step {
        let mut music = Music::new(str_field(packet, "url")?);

        match packet.get("options") {
            None | Some(Value::Null) => {}
            Some(Value::Object(options)) => {
                for (key, value) in options {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => {
                            return Err(ProtocolError::BadField {
                                field: "options",
                                expected: "string or number values",
                            }
                            .into())
                        }
                    };
                    if let Err(e) = music.set_option(key, value) {
                        self.send_status(session, StatusCode::Rejected, Some(&e.to_string()));
                        return Ok((Status::Finished, State::None));
                    }
                }
            }
            Some(_) => {
                return Err(ProtocolError::BadField {
                    field: "options",
                    expected: "object",
                }
                .into())
            }
        }

        if let Err(e) = session.registry().add_music(session.playlist_name(), music.clone()) {
            tracing::error!(conv = self.id, "Failed to add music: {}", e);
            self.send_status(session, StatusCode::Error, Some(&e.to_string()));
            return Ok((Status::Finished, State::None));
        }

        // Subscribed sessions are fed through the playlist; others play it now
        if !session.subscribed() {
            session.player().append_music(&music);
        }
        self.done(session)
    }

    fn on_position_set(&mut self, session: &mut dyn Session, packet: &Value) -> Step {
        let position = f64_field(packet, "pos")?;
        session.player().seek(position);
        self.done(session)
    }

    fn on_pause(&mut self, session: &mut dyn Session, packet: &Value) -> Step {
        if bool_field(packet, "stop")? {
            session.player().pause();
        } else {
            session.player().play();
        }
        self.done(session)
    }

    fn dispatch(&mut self, session: &mut dyn Session, packet: &Value) -> Result<Status, ConversationError> {
        let raw = u32_field(packet, "type")?;
        match ClientPacketType::try_from(raw) {
            Ok(key) => self.process_state_machine(key, session, packet),
            Err(packet_type) => Err(ConversationError::Rejected {
                state: self.state.into(),
                packet_type,
            }),
        }
    }
}

impl StateMachine for V1Conversation {
    type State = State;
    type PacketType = ClientPacketType;

    fn transitions() -> &'static TransitionTable<ClientPacketType, State, Self> {
        static TABLE: OnceLock<TransitionTable<ClientPacketType, State, V1Conversation>> =
            OnceLock::new();
        TABLE.get_or_init(|| {
            use ClientPacketType as P;
            TransitionTable::new(State::COUNT)
                .bind(State::None, P::Pulse, Self::on_pulse)
                .bind(State::None, P::PlSel, Self::on_playlist_select)
                .bind(State::None, P::PlSub, Self::on_subscribe)
                .bind(State::None, P::MusAdd, Self::on_music_add)
                .bind(State::None, P::PosSet, Self::on_position_set)
                .bind(State::None, P::Pause, Self::on_pause)
                .bind(State::PlSel, P::Password, Self::on_password)
        })
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_state(&mut self, state: State) {
        self.state = state;
    }
}

impl Conversation for V1Conversation {
    fn id(&self) -> i64 {
        self.id
    }

    fn handle_packet(&mut self, session: &mut dyn Session, packet: &Value) -> Status {
        match self.dispatch(session, packet) {
            Ok(status) => status,
            Err(e @ ConversationError::Rejected { .. }) => {
                tracing::error!(conv = self.id, "{}", e);
                self.send_status(
                    session,
                    StatusCode::Unexpected,
                    Some("Packet could not be handled by the state machine"),
                );
                Status::Unexpected
            }
            Err(ConversationError::Malformed(e)) => {
                tracing::error!(conv = self.id, "Rejecting malformed packet: {}", e);
                self.send_status(session, StatusCode::Rejected, Some(&e.to_string()));
                Status::Unexpected
            }
        }
    }

    fn send_timeout(&mut self, session: &mut dyn Session) {
        self.send_status(session, StatusCode::Timeout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GLOBAL_PLAYLIST;
    use crate::music::MusicRegistry;
    use crate::network::session::tests::{recording_session, sent_packets};
    use crate::player::Player;

    fn packet(kind: ClientPacketType, id: i64, body: Value) -> Value {
        let mut packet = body;
        packet["type"] = json!(kind as u32);
        packet["id"] = json!(id);
        packet
    }

    fn codes(packets: &[Value]) -> Vec<u64> {
        packets.iter().map(|p| p["code"].as_u64().unwrap()).collect()
    }

    #[test]
    fn test_create_playlist_flow() {
        let (mut session, output) = recording_session();
        let mut conv = V1Conversation::new(4);

        let status = conv.handle_packet(
            &mut session,
            &packet(ClientPacketType::PlSel, 4, json!({"name": "x"})),
        );
        assert_eq!(status, Status::Continuing);
        assert_eq!(conv.state(), State::PlSel);

        let status = conv.handle_packet(
            &mut session,
            &packet(ClientPacketType::Password, 4, json!({"pass": ""})),
        );
        assert_eq!(status, Status::Continuing);
        assert_eq!(conv.state(), State::PlSel);
        assert!(!session.registry().playlist_exists("x"));

        let status = conv.handle_packet(
            &mut session,
            &packet(ClientPacketType::Password, 4, json!({"pass": "s3cret"})),
        );
        assert_eq!(status, Status::Finished);
        assert_eq!(conv.state(), State::None);
        assert!(session.registry().playlist_exists("x"));
        assert_eq!(session.playlist_name(), "x");

        let sent = sent_packets(&output);
        assert_eq!(
            codes(&sent),
            vec![
                StatusCode::NotFound as u64,
                StatusCode::BadPass as u64,
                StatusCode::Ok as u64
            ]
        );
        assert!(sent.iter().all(|p| p["id"] == 4 && p["type"] == 0));
    }

    #[test]
    fn test_select_existing_playlist() {
        let (mut session, output) = recording_session();
        session.registry().new_playlist("rock", "p").unwrap();

        let mut conv = V1Conversation::new(1);
        let status = conv.handle_packet(
            &mut session,
            &packet(ClientPacketType::PlSel, 1, json!({"name": "rock"})),
        );

        assert_eq!(status, Status::Finished);
        assert_eq!(session.playlist_name(), "rock");
        assert_eq!(codes(&sent_packets(&output)), vec![StatusCode::Ok as u64]);
    }

    #[test]
    fn test_unbound_packets_are_unexpected() {
        let (mut session, output) = recording_session();
        let mut conv = V1Conversation::new(-1);

        let status = conv.handle_packet(&mut session, &packet(ClientPacketType::Password, -1, json!({"pass": "p"})));
        assert_eq!(status, Status::Unexpected);

        let status = conv.handle_packet(&mut session, &packet(ClientPacketType::VolSet, -1, json!({})));
        assert_eq!(status, Status::Unexpected);

        let status = conv.handle_packet(&mut session, &json!({"type": 250, "id": -1}));
        assert_eq!(status, Status::Unexpected);

        assert_eq!(codes(&sent_packets(&output)), vec![StatusCode::Unexpected as u64; 3]);
    }

    #[test]
    fn test_malformed_fields_are_rejected() {
        let (mut session, output) = recording_session();
        let mut conv = V1Conversation::new(2);

        let status = conv.handle_packet(&mut session, &packet(ClientPacketType::PlSub, 2, json!({"sub": "yes"})));
        assert_eq!(status, Status::Unexpected);

        let status = conv.handle_packet(&mut session, &json!({"id": 2}));
        assert_eq!(status, Status::Unexpected);

        assert_eq!(conv.state(), State::None);
        assert_eq!(codes(&sent_packets(&output)), vec![StatusCode::Rejected as u64; 2]);
    }

    #[test]
    fn test_music_add_twice_dedups() {
        let (mut session, output) = recording_session();
        let add = packet(
            ClientPacketType::MusAdd,
            -1,
            json!({"url": "https://example.com/a.ogg", "options": {"start": "5", "stop": 60}}),
        );

        assert_eq!(V1Conversation::new(-1).handle_packet(&mut session, &add), Status::Finished);
        assert_eq!(V1Conversation::new(-1).handle_packet(&mut session, &add), Status::Finished);

        let registry: &MusicRegistry = session.registry();
        assert_eq!(registry.music_count(), 1);
        let tracks = registry.playlist_tracks(GLOBAL_PLAYLIST).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0], tracks[1]);
        assert_eq!(registry.music(tracks[0]).unwrap().options(), "start=5,stop=60");

        // Not subscribed: both additions went straight to the live queue
        assert_eq!(session.player().status().queue_titles.len(), 2);
        assert_eq!(codes(&sent_packets(&output)), vec![0, 0]);
    }

    #[test]
    fn test_music_add_when_subscribed_skips_queue() {
        let (mut session, _output) = recording_session();
        session.subscribe();

        let add = packet(ClientPacketType::MusAdd, -1, json!({"url": "a"}));
        V1Conversation::new(-1).handle_packet(&mut session, &add);

        assert_eq!(session.registry().music_count(), 1);
        assert!(session.player().status().queue_titles.is_empty());
    }

    #[test]
    fn test_music_add_bad_option() {
        let (mut session, output) = recording_session();
        let add = packet(
            ClientPacketType::MusAdd,
            -1,
            json!({"url": "a", "options": {"volume": "11"}}),
        );

        let status = V1Conversation::new(-1).handle_packet(&mut session, &add);
        assert_eq!(status, Status::Finished);
        assert_eq!(session.registry().music_count(), 0);
        assert_eq!(codes(&sent_packets(&output)), vec![StatusCode::Rejected as u64]);
    }

    #[test]
    fn test_playback_controls() {
        let (mut session, output) = recording_session();
        session.player().append_music(&Music::new("a"));

        V1Conversation::new(-1).handle_packet(&mut session, &packet(ClientPacketType::Pause, -1, json!({"stop": true})));
        assert!(session.player().status().paused);

        V1Conversation::new(-1).handle_packet(&mut session, &packet(ClientPacketType::PosSet, -1, json!({"pos": 30.5})));
        assert_eq!(session.player().status().position, 30.5);

        V1Conversation::new(-1).handle_packet(&mut session, &packet(ClientPacketType::Pause, -1, json!({"stop": false})));
        assert!(!session.player().status().paused);

        assert_eq!(codes(&sent_packets(&output)), vec![0, 0, 0]);
    }

    #[test]
    fn test_subscription_toggle() {
        let (mut session, _output) = recording_session();
        let mut conv = V1Conversation::new(-1);

        conv.handle_packet(&mut session, &packet(ClientPacketType::PlSub, -1, json!({"sub": true})));
        assert!(session.subscribed());
        assert_eq!(session.registry().subscribers(GLOBAL_PLAYLIST), Some(1));

        conv.handle_packet(&mut session, &packet(ClientPacketType::PlSub, -1, json!({"sub": false})));
        assert!(!session.subscribed());
        assert_eq!(session.registry().subscribers(GLOBAL_PLAYLIST), Some(0));
    }

    #[test]
    fn test_pulse_reports_player_status() {
        let (mut session, output) = recording_session();
        session.player().append_music(&Music::new("a"));

        let status = V1Conversation::new(9).handle_packet(&mut session, &packet(ClientPacketType::Pulse, 9, json!({})));
        assert_eq!(status, Status::Finished);

        let sent = sent_packets(&output);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], ServerPacketType::Pulse as u32);
        assert_eq!(sent[0]["id"], 9);
        assert_eq!(sent[0]["playlist"], json!(["a"]));
        assert_eq!(sent[0]["pause"], false);
    }

    #[test]
    fn test_timeout_notice() {
        let (mut session, output) = recording_session();
        V1Conversation::new(5).send_timeout(&mut session);

        let sent = sent_packets(&output);
        assert_eq!(sent[0]["code"], StatusCode::Timeout as u32);
        assert_eq!(sent[0]["id"], 5);
    }

    #[test]
    fn test_packet_type_numbering() {
        assert_eq!(ClientPacketType::try_from(17), Ok(ClientPacketType::Pause));
        assert_eq!(ClientPacketType::try_from(6), Ok(ClientPacketType::PlSel));
        assert_eq!(ClientPacketType::try_from(18), Err(18));
        assert_eq!(StatusCode::NotFound as u32, 7);
    }
}
