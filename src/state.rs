//! Canonical lobby state, updated as server messages arrive.

use std::collections::HashMap;

use chrono::Utc;

use crate::presence::{self, KnownMember, MemberStatus};
use crate::protocol::{Member, Room, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Event emitted when lobby state changes, for the driver to render.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    Connected,
    Disconnected,
    ConnectionError { message: String },
    Welcome { member: Member },
    MemberJoined(Member),
    MemberLeft(Member),
    MemberRenamed(Member),
    RoomsUpdated { count: usize },
    RoomError { message: String },
    Pong,
    SessionTick { room_id: String },
}

/// Tracked lobby state. The canonical copy of members and rooms comes
/// from the server; the known-members superset and the room error are
/// the only client-derived fields, and all of it is cleared together by
/// [`LobbyState::reset`].
#[derive(Debug, Default)]
pub struct LobbyState {
    pub me: Option<Member>,
    pub members: Vec<Member>,
    pub rooms: Vec<Room>,
    pub known_members: HashMap<String, KnownMember>,
    pub room_error: Option<String>,
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one server message and update state. Returns the event to
    /// surface, if any. Unknown kinds are ignored for forward
    /// compatibility; every kind carrying a member payload flows through
    /// the known-members upsert.
    pub fn handle_message(&mut self, msg: ServerMessage) -> Option<LobbyEvent> {
        match msg {
            ServerMessage::Welcome { member, members, rooms } => {
                let now = Utc::now();
                for m in &members {
                    presence::upsert_known(&mut self.known_members, m, now);
                }
                self.me = Some(member.clone());
                self.members = members;
                self.rooms = rooms;
                self.room_error = None;
                Some(LobbyEvent::Welcome { member })
            }
            ServerMessage::MemberJoined { member } => {
                presence::upsert_known(&mut self.known_members, &member, Utc::now());
                if !self.members.iter().any(|m| m.member_id == member.member_id) {
                    self.members.push(member.clone());
                }
                Some(LobbyEvent::MemberJoined(member))
            }
            ServerMessage::MemberLeft { member } => {
                // Stamp, never delete: the superset keeps departed members
                // for display continuity.
                presence::upsert_known(&mut self.known_members, &member, Utc::now());
                self.members.retain(|m| m.member_id != member.member_id);
                Some(LobbyEvent::MemberLeft(member))
            }
            ServerMessage::MemberRenamed { member } => {
                presence::upsert_known(&mut self.known_members, &member, Utc::now());
                if let Some(existing) = self
                    .members
                    .iter_mut()
                    .find(|m| m.member_id == member.member_id)
                {
                    *existing = member.clone();
                }
                if let Some(me) = &mut self.me {
                    if me.member_id == member.member_id {
                        *me = member.clone();
                    }
                }
                Some(LobbyEvent::MemberRenamed(member))
            }
            ServerMessage::RoomsUpdated { rooms } => {
                let count = rooms.len();
                self.rooms = rooms;
                Some(LobbyEvent::RoomsUpdated { count })
            }
            ServerMessage::Error { message } => {
                self.room_error = Some(message.clone());
                Some(LobbyEvent::RoomError { message })
            }
            ServerMessage::Pong => Some(LobbyEvent::Pong),
            ServerMessage::Unknown => {
                tracing::trace!("ignoring unknown server message kind");
                None
            }
        }
    }

    /// The room whose roster contains the given member, if any. Pure
    /// lookup, recomputed per query.
    pub fn room_of(&self, member_id: &str) -> Option<&Room> {
        self.rooms
            .iter()
            .find(|r| r.members.iter().any(|m| m.member_id == member_id))
    }

    /// Derived, sorted presence list. Pure projection over canonical
    /// state; never cached.
    pub fn statuses(&self) -> Vec<MemberStatus> {
        presence::derive_statuses(&self.known_members, &self.members, &self.rooms)
    }

    /// Full session reset: forget everything, including the superset.
    /// Idempotent.
    pub fn reset(&mut self) {
        self.me = None;
        self.members.clear();
        self.rooms.clear();
        self.known_members.clear();
        self.room_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceStatus;

    fn member(id: &str, name: &str) -> Member {
        Member {
            member_id: id.into(),
            name: name.into(),
            joined_at: String::new(),
        }
    }

    fn welcome(me: Member, members: Vec<Member>, rooms: Vec<Room>) -> ServerMessage {
        ServerMessage::Welcome { member: me, members, rooms }
    }

    #[test]
    fn welcome_seeds_everything() {
        let mut state = LobbyState::new();
        state.room_error = Some("stale".into());
        let ev = state.handle_message(welcome(
            member("1", "Nova"),
            vec![member("1", "Nova"), member("2", "Lyra")],
            vec![],
        ));
        assert!(matches!(ev, Some(LobbyEvent::Welcome { .. })));
        assert_eq!(state.me.as_ref().unwrap().member_id, "1");
        assert_eq!(state.members.len(), 2);
        assert_eq!(state.known_members.len(), 2);
        assert!(state.room_error.is_none());
    }

    #[test]
    fn known_members_never_shrink() {
        let mut state = LobbyState::new();
        state.handle_message(welcome(member("1", "Nova"), vec![member("1", "Nova")], vec![]));
        state.handle_message(ServerMessage::MemberJoined { member: member("2", "Lyra") });
        assert_eq!(state.known_members.len(), 2);
        state.handle_message(ServerMessage::MemberLeft { member: member("2", "Lyra") });
        assert_eq!(state.members.len(), 1);
        assert_eq!(state.known_members.len(), 2);
        state.handle_message(ServerMessage::MemberRenamed { member: member("1", "SuperNova") });
        assert_eq!(state.known_members.len(), 2);
        assert_eq!(state.known_members["1"].name, "SuperNova");
    }

    #[test]
    fn departed_member_shows_disconnected() {
        let mut state = LobbyState::new();
        state.handle_message(welcome(
            member("1", "Nova"),
            vec![member("1", "Nova"), member("2", "Lyra")],
            vec![],
        ));
        state.handle_message(ServerMessage::MemberLeft { member: member("2", "Lyra") });
        let rows = state.statuses();
        let lyra = rows.iter().find(|r| r.member_id == "2").unwrap();
        assert_eq!(lyra.status, PresenceStatus::Disconnected);
    }

    #[test]
    fn joined_member_is_not_duplicated() {
        let mut state = LobbyState::new();
        state.handle_message(ServerMessage::MemberJoined { member: member("2", "Lyra") });
        state.handle_message(ServerMessage::MemberJoined { member: member("2", "Lyra") });
        assert_eq!(state.members.len(), 1);
    }

    #[test]
    fn rename_updates_self() {
        let mut state = LobbyState::new();
        state.handle_message(welcome(member("1", "Nova"), vec![member("1", "Nova")], vec![]));
        state.handle_message(ServerMessage::MemberRenamed { member: member("1", "SuperNova") });
        assert_eq!(state.me.as_ref().unwrap().name, "SuperNova");
        assert_eq!(state.members[0].name, "SuperNova");
    }

    #[test]
    fn rooms_replaced_wholesale() {
        let mut state = LobbyState::new();
        let rooms = vec![Room {
            room_id: "r1".into(),
            name: "alpha".into(),
            host_id: "1".into(),
            host_name: "Nova".into(),
            started: false,
            members: vec![member("1", "Nova")],
        }];
        state.handle_message(ServerMessage::RoomsUpdated { rooms });
        assert_eq!(state.rooms.len(), 1);
        assert_eq!(state.room_of("1").unwrap().room_id, "r1");
        state.handle_message(ServerMessage::RoomsUpdated { rooms: vec![] });
        assert!(state.rooms.is_empty());
        assert!(state.room_of("1").is_none());
    }

    #[test]
    fn error_message_is_room_scoped_and_transient() {
        let mut state = LobbyState::new();
        state.handle_message(ServerMessage::Error { message: "room is full".into() });
        assert_eq!(state.room_error.as_deref(), Some("room is full"));
        state.handle_message(welcome(member("1", "Nova"), vec![], vec![]));
        assert!(state.room_error.is_none());
    }

    #[test]
    fn reset_clears_everything_and_is_idempotent() {
        let mut state = LobbyState::new();
        state.handle_message(welcome(
            member("1", "Nova"),
            vec![member("1", "Nova")],
            vec![],
        ));
        state.handle_message(ServerMessage::Error { message: "x".into() });
        state.reset();
        assert!(state.me.is_none());
        assert!(state.members.is_empty());
        assert!(state.rooms.is_empty());
        assert!(state.known_members.is_empty());
        assert!(state.room_error.is_none());
        state.reset();
        assert!(state.known_members.is_empty());
    }
}
