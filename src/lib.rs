//! atrium — a real-time lobby client.
//!
//! Guests obtain a session credential from the credential service, join
//! a shared lobby over one WebSocket, organize into rooms, and run a
//! lightweight client-only session simulation per started room. The
//! crate is the synchronization core: connection lifecycle, message
//! dispatch into canonical state, presence reconciliation, and the
//! session simulation engine. Rendering lives in the driver binary.

pub mod auth;
pub mod client;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod state;

pub use auth::{request_guest_credential, AuthError, Credential};
pub use client::{ClientError, LobbyClient, DECAY_PERIOD};
pub use presence::{KnownMember, MemberStatus, PresenceStatus};
pub use protocol::{ClientMessage, Member, Room, ServerMessage};
pub use session::{PlayerStats, SessionEngine, SessionState};
pub use state::{ConnectionStatus, LobbyEvent, LobbyState};
