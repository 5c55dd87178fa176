//! Per-room session simulation.
//!
//! Purely cosmetic client state layered atop authoritative room
//! membership: per-player energy/focus/ready meters and a room-level
//! activity meter, drained by a fixed-cadence decay tick and nudged by
//! local user actions. Nothing here is ever sent to the server.

use std::collections::HashMap;

use crate::protocol::{Member, Room};

/// Current local time as epoch milliseconds, the stamp format used for
/// all simulation timestamps (0 = never).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn clamp_meter(value: i32) -> i32 {
    value.clamp(0, 100)
}

/// Order-independent hash of a member id, so starting stats are stable
/// across runs and across clients observing the same membership.
fn seed(member_id: &str) -> u32 {
    member_id.bytes().fold(0u32, |acc, b| acc.wrapping_add(b as u32))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStats {
    pub name: String,
    pub energy: i32,
    pub focus: i32,
    pub ready: bool,
    pub last_action_at: i64,
}

fn seeded_stats(member: &Member) -> PlayerStats {
    let seed = seed(&member.member_id);
    PlayerStats {
        name: member.name.clone(),
        energy: (45 + seed % 40) as i32,
        focus: (35 + (seed / 8) % 45) as i32,
        ready: false,
        last_action_at: 0,
    }
}

/// One room's simulated session. Created lazily the first time the room
/// is observed started; persists (possibly unused) until session reset.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub room_id: String,
    pub activity: i32,
    pub pulse_count: u32,
    pub last_pulse_at: i64,
    pub last_event: String,
    pub last_event_at: i64,
    pub players: HashMap<String, PlayerStats>,
}

impl SessionState {
    pub fn start(room: &Room) -> Self {
        let players = room
            .members
            .iter()
            .map(|m| (m.member_id.clone(), seeded_stats(m)))
            .collect();
        Self {
            room_id: room.room_id.clone(),
            activity: 40,
            pulse_count: 0,
            last_pulse_at: 0,
            last_event: String::new(),
            last_event_at: 0,
            players,
        }
    }

    /// Reconcile the player mapping with the room's current roster:
    /// survivors keep their stats (only the display name refreshes),
    /// newcomers are seeded, departures are dropped. Idempotent.
    pub fn sync_roster(&mut self, room: &Room) {
        for member in &room.members {
            match self.players.get_mut(&member.member_id) {
                Some(player) => player.name = member.name.clone(),
                None => {
                    self.players
                        .insert(member.member_id.clone(), seeded_stats(member));
                }
            }
        }
        self.players
            .retain(|id, _| room.members.iter().any(|m| &m.member_id == id));
    }

    /// One decay pass: every meter drops by 1, floored at 0.
    pub fn decay_tick(&mut self) {
        for player in self.players.values_mut() {
            player.energy = (player.energy - 1).max(0);
            player.focus = (player.focus - 1).max(0);
        }
        self.activity = (self.activity - 1).max(0);
    }

    fn note_event(&mut self, text: String, now_ms: i64) {
        self.last_event = text;
        self.last_event_at = now_ms;
    }

    // Every action is a no-op if its target player is absent — membership
    // sync can race ahead of action dispatch.

    pub fn boost_self(&mut self, member_id: &str, now_ms: i64) {
        let Some(player) = self.players.get_mut(member_id) else {
            return;
        };
        player.energy = clamp_meter(player.energy + 12);
        player.last_action_at = now_ms;
        let name = player.name.clone();
        self.activity = clamp_meter(self.activity + 6);
        self.note_event(format!("{name} boosted energy."), now_ms);
    }

    pub fn sharpen_focus(&mut self, member_id: &str, now_ms: i64) {
        let Some(player) = self.players.get_mut(member_id) else {
            return;
        };
        player.focus = clamp_meter(player.focus + 12);
        player.last_action_at = now_ms;
        let name = player.name.clone();
        self.activity = clamp_meter(self.activity + 5);
        self.note_event(format!("{name} sharpened focus."), now_ms);
    }

    pub fn toggle_ready(&mut self, member_id: &str, now_ms: i64) {
        let Some(player) = self.players.get_mut(member_id) else {
            return;
        };
        player.ready = !player.ready;
        player.last_action_at = now_ms;
        let name = player.name.clone();
        let ready = player.ready;
        self.activity = clamp_meter(self.activity + 4);
        let text = if ready {
            format!("{name} is ready.")
        } else {
            format!("{name} is not ready.")
        };
        self.note_event(text, now_ms);
    }

    pub fn pulse(&mut self, now_ms: i64) {
        for player in self.players.values_mut() {
            player.energy = clamp_meter(player.energy + 4);
            player.last_action_at = now_ms;
        }
        self.activity = clamp_meter(self.activity + 10);
        self.pulse_count += 1;
        self.last_pulse_at = now_ms;
        self.note_event("Room pulse sent.".to_string(), now_ms);
    }

    pub fn boost_player(&mut self, target_id: &str, now_ms: i64) {
        let Some(player) = self.players.get_mut(target_id) else {
            return;
        };
        player.energy = clamp_meter(player.energy + 8);
        player.last_action_at = now_ms;
        let name = player.name.clone();
        self.activity = clamp_meter(self.activity + 4);
        self.note_event(format!("{name} received a boost."), now_ms);
    }
}

/// All live sessions, keyed by room id.
#[derive(Debug, Default)]
pub struct SessionEngine {
    sessions: HashMap<String, SessionState>,
}

impl SessionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the current room list: lazily start a session the first
    /// time a room is seen started, and keep every known session's roster
    /// in sync. Rooms that vanished from the list leave their session
    /// untouched — it may become relevant again if the user returns.
    pub fn observe_rooms(&mut self, rooms: &[Room]) {
        for room in rooms {
            match self.sessions.get_mut(&room.room_id) {
                Some(session) => session.sync_roster(room),
                None if room.started => {
                    tracing::debug!(room_id = %room.room_id, "starting session simulation");
                    self.sessions
                        .insert(room.room_id.clone(), SessionState::start(room));
                }
                None => {}
            }
        }
    }

    pub fn get(&self, room_id: &str) -> Option<&SessionState> {
        self.sessions.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(room_id)
    }

    pub fn reset(&mut self) {
        self.sessions.clear();
    }
}
