//! Presence reconciliation.
//!
//! The known-members superset records every member ever sighted this
//! session. Entries are upserted on every sighting and stamped (never
//! deleted) on disconnect; only a full session reset wipes them. The
//! status list is a pure projection recomputed from canonical state on
//! every query — it is never stored as independent mutable state.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::protocol::{Member, Room};

/// Last-received member fields plus the local time of the last sighting.
#[derive(Debug, Clone)]
pub struct KnownMember {
    pub member_id: String,
    pub name: String,
    pub joined_at: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Insert or refresh the superset entry for a sighted member.
pub fn upsert_known(known: &mut HashMap<String, KnownMember>, member: &Member, now: DateTime<Utc>) {
    known
        .entry(member.member_id.clone())
        .and_modify(|k| {
            k.name = member.name.clone();
            k.joined_at = member.joined_at.clone();
            k.last_seen_at = now;
        })
        .or_insert_with(|| KnownMember {
            member_id: member.member_id.clone(),
            name: member.name.clone(),
            joined_at: member.joined_at.clone(),
            last_seen_at: now,
        });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    InGame,
    InRoom,
    InLobby,
    Disconnected,
}

impl PresenceStatus {
    pub fn rank(self) -> u8 {
        match self {
            PresenceStatus::InGame => 0,
            PresenceStatus::InRoom => 1,
            PresenceStatus::InLobby => 2,
            PresenceStatus::Disconnected => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::InGame => "in_game",
            PresenceStatus::InRoom => "in_room",
            PresenceStatus::InLobby => "in_lobby",
            PresenceStatus::Disconnected => "disconnected",
        }
    }
}

/// One row of the derived status list.
#[derive(Debug, Clone)]
pub struct MemberStatus {
    pub member_id: String,
    pub name: String,
    pub status: PresenceStatus,
    /// The room the member currently occupies, if any.
    pub room: Option<(String, String)>,
}

/// Derive a sorted status row per known member.
///
/// Status priority: not in the connected members list → disconnected;
/// in a started room's roster → in_game; in a room's roster → in_room;
/// otherwise in_lobby. A member_id present in several rosters resolves to
/// the room encountered last while flattening. The server contract does
/// not allow that situation; the precedence here is iteration order, not
/// policy, so it is left visible rather than papered over.
pub fn derive_statuses(
    known: &HashMap<String, KnownMember>,
    members: &[Member],
    rooms: &[Room],
) -> Vec<MemberStatus> {
    let connected: HashSet<&str> = members.iter().map(|m| m.member_id.as_str()).collect();

    let mut roster: HashMap<&str, &Room> = HashMap::new();
    for room in rooms {
        for member in &room.members {
            roster.insert(member.member_id.as_str(), room);
        }
    }

    let mut rows: Vec<MemberStatus> = known
        .values()
        .map(|k| {
            let slot = roster.get(k.member_id.as_str());
            let status = if !connected.contains(k.member_id.as_str()) {
                PresenceStatus::Disconnected
            } else {
                match slot {
                    Some(room) if room.started => PresenceStatus::InGame,
                    Some(_) => PresenceStatus::InRoom,
                    None => PresenceStatus::InLobby,
                }
            };
            MemberStatus {
                member_id: k.member_id.clone(),
                name: k.name.clone(),
                status,
                room: slot.map(|r| (r.room_id.clone(), r.name.clone())),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
    rows
}
