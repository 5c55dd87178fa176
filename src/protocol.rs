//! Wire types for the lobby WebSocket protocol.
//!
//! Every frame is a single JSON object tagged by a `type` field. Inbound
//! frames that fail to parse are dropped by the caller; unknown `type` tags
//! deserialize to [`ServerMessage::Unknown`] so new server message kinds
//! never break an older client.

use serde::{Deserialize, Serialize};

/// A connected participant, as pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub joined_at: String,
}

/// A room in the lobby. Entirely server-authoritative; the client only
/// requests mutations and never edits its copy directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub members: Vec<Member>,
}

// ── Server → Client ──

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        member: Member,
        #[serde(default)]
        members: Vec<Member>,
        #[serde(default)]
        rooms: Vec<Room>,
    },
    MemberJoined {
        member: Member,
    },
    MemberLeft {
        member: Member,
    },
    MemberRenamed {
        member: Member,
    },
    RoomsUpdated {
        #[serde(default)]
        rooms: Vec<Room>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Pong,
    #[serde(other)]
    Unknown,
}

/// Parse one inbound text frame. Returns None on malformed JSON — the
/// protocol is fail-soft, a bad frame is never fatal.
pub fn parse_frame(raw: &str) -> Option<ServerMessage> {
    serde_json::from_str(raw).ok()
}

// ── Client → Server ──

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Rename { name: String },
    CreateRoom { name: String },
    JoinRoom { room_id: String },
    LeaveRoom,
    StartGame { room_id: String },
    Ping,
}
