//! Connection manager for the lobby WebSocket.
//!
//! [`LobbyClient`] owns the single live transport handle. Each connect
//! replaces the handle and bumps a generation counter; reader tasks tag
//! every event they forward with the generation they were spawned under,
//! and the pump discards events from superseded generations. That guard
//! is the sole cancellation mechanism — an old reader task is never
//! explicitly stopped, its events just become inert.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::Credential;
use crate::protocol::{self, ClientMessage};
use crate::session::SessionEngine;
use crate::state::{ConnectionStatus, LobbyEvent, LobbyState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Cadence of the session decay tick while a started room is active.
pub const DECAY_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("a session credential is required before connecting")]
    MissingCredential,
    #[error("not connected to the lobby")]
    NotConnected,
    #[error("invalid lobby endpoint: {0}")]
    Endpoint(String),
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Raw event forwarded from a transport task, tagged with the generation
/// of the handle that produced it.
enum TransportEvent {
    Opened(Box<WsSink>),
    Frame(String),
    Failed(String),
    Closed,
}

enum Pump {
    Inbound(u64, TransportEvent),
    DecayTick,
}

pub struct LobbyClient {
    ws_url: String,
    status: ConnectionStatus,
    generation: u64,
    writer: Option<WsSink>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    credential: Option<Credential>,
    /// Transport task of the current generation. Aborted when the handle
    /// is superseded, so the old socket actually closes instead of
    /// lingering behind an inert reader.
    transport_task: Option<JoinHandle<()>>,
    /// Decay timer, present exactly while the room containing self is
    /// started. Tagged with its room id so a room switch restarts it.
    decay: Option<(String, Interval)>,
    pub state: LobbyState,
    pub sessions: SessionEngine,
}

impl LobbyClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            ws_url: ws_url.into(),
            status: ConnectionStatus::Disconnected,
            generation: 0,
            writer: None,
            events_tx,
            events_rx,
            credential: None,
            transport_task: None,
            decay: None,
            state: LobbyState::new(),
            sessions: SessionEngine::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Open a new lobby connection, superseding any existing handle.
    ///
    /// Requires a non-empty credential token; fails with
    /// [`ClientError::MissingCredential`] before any dial attempt
    /// otherwise. The dial itself is asynchronous — success or failure
    /// arrives later through [`LobbyClient::next_event`]. There is no
    /// connect timeout; failure surfaces only through the transport's own
    /// error/close signals.
    pub fn connect(
        &mut self,
        display_name: Option<&str>,
        credential: Credential,
    ) -> Result<(), ClientError> {
        if credential.token.is_empty() {
            return Err(ClientError::MissingCredential);
        }

        // Validate the endpoint before touching any state: a bad URL must
        // not leave the client stuck in Connecting with no dial in flight.
        let mut url = reqwest::Url::parse(&self.ws_url)
            .map_err(|e| ClientError::Endpoint(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", &credential.token);
        if let Some(name) = display_name {
            url.query_pairs_mut().append_pair("name", name);
        }

        // Close the previous handle before dialing.
        self.supersede();
        self.status = ConnectionStatus::Connecting;
        self.credential = Some(credential);

        let generation = self.generation;
        let tx = self.events_tx.clone();
        tracing::info!(url = %self.ws_url, generation, "connecting to lobby");
        self.transport_task = Some(tokio::spawn(async move {
            match connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    let (sink, mut reader) = stream.split();
                    if tx
                        .send((generation, TransportEvent::Opened(Box::new(sink))))
                        .is_err()
                    {
                        return;
                    }
                    while let Some(item) = reader.next().await {
                        match item {
                            Ok(WsMessage::Text(text)) => {
                                let _ = tx.send((
                                    generation,
                                    TransportEvent::Frame(text.as_str().to_owned()),
                                ));
                            }
                            Ok(WsMessage::Close(_)) => break,
                            // Binary and ping/pong control frames are not
                            // part of the lobby protocol.
                            Ok(_) => {}
                            Err(e) => {
                                let _ = tx
                                    .send((generation, TransportEvent::Failed(e.to_string())));
                                break;
                            }
                        }
                    }
                    let _ = tx.send((generation, TransportEvent::Closed));
                }
                Err(e) => {
                    let _ = tx.send((generation, TransportEvent::Failed(e.to_string())));
                }
            }
        }));
        Ok(())
    }

    /// Supersede the current transport handle: bump the generation (its
    /// queued events become inert) and abort its task, dropping both
    /// socket halves so the connection closes.
    fn supersede(&mut self) {
        self.generation += 1;
        self.writer = None;
        if let Some(task) = self.transport_task.take() {
            task.abort();
        }
    }

    /// Transmit one message, fire-and-forget: no queueing, no retry, no
    /// delivery confirmation. Fails as a no-op unless connected.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        if self.status != ConnectionStatus::Connected {
            return Err(ClientError::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        let frame = serde_json::to_string(msg)?;
        tracing::debug!("→ {frame}");
        writer.send(WsMessage::text(frame)).await?;
        Ok(())
    }

    /// User-initiated close: supersede the handle and reset the session.
    pub fn close(&mut self) {
        self.supersede();
        self.status = ConnectionStatus::Disconnected;
        self.reset();
    }

    /// Next client event. Selects over transport events and, while a
    /// started room is active, the decay tick.
    pub async fn next_event(&mut self) -> LobbyEvent {
        loop {
            let pumped = {
                let Self { events_rx, decay, .. } = self;
                let tick = async {
                    match decay {
                        Some((_, interval)) => {
                            interval.tick().await;
                        }
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    inbound = events_rx.recv() => match inbound {
                        Some((generation, event)) => Pump::Inbound(generation, event),
                        // Unreachable: self holds a sender.
                        None => continue,
                    },
                    _ = tick => Pump::DecayTick,
                }
            };

            match pumped {
                Pump::Inbound(generation, event) => {
                    if let Some(out) = self.apply(generation, event) {
                        return out;
                    }
                }
                Pump::DecayTick => {
                    if let Some((room_id, _)) = &self.decay {
                        let room_id = room_id.clone();
                        if let Some(session) = self.sessions.get_mut(&room_id) {
                            session.decay_tick();
                        }
                        return LobbyEvent::SessionTick { room_id };
                    }
                }
            }
        }
    }

    /// Apply one transport event. Events from superseded generations are
    /// permanent no-ops.
    fn apply(&mut self, generation: u64, event: TransportEvent) -> Option<LobbyEvent> {
        if generation != self.generation {
            tracing::trace!(generation, current = self.generation, "stale transport event");
            return None;
        }
        match event {
            TransportEvent::Opened(sink) => {
                self.writer = Some(*sink);
                self.status = ConnectionStatus::Connected;
                tracing::info!("lobby connection open");
                Some(LobbyEvent::Connected)
            }
            TransportEvent::Failed(message) => {
                self.writer = None;
                self.status = ConnectionStatus::Error;
                tracing::warn!("lobby transport error: {message}");
                Some(LobbyEvent::ConnectionError { message })
            }
            TransportEvent::Closed => {
                self.writer = None;
                self.status = ConnectionStatus::Disconnected;
                self.reset();
                tracing::info!("lobby connection closed, session reset");
                Some(LobbyEvent::Disconnected)
            }
            TransportEvent::Frame(raw) => {
                let preview: String = raw.chars().take(200).collect();
                tracing::debug!("← {preview}");
                let Some(msg) = protocol::parse_frame(&raw) else {
                    tracing::trace!("dropping malformed frame");
                    return None;
                };
                let out = self.state.handle_message(msg);
                self.sessions.observe_rooms(&self.state.rooms);
                self.refresh_decay();
                out
            }
        }
    }

    /// Full session reset: canonical state, the known-members superset,
    /// all simulated sessions, the credential, and the decay timer.
    /// Idempotent.
    fn reset(&mut self) {
        self.state.reset();
        self.sessions.reset();
        self.credential = None;
        self.decay = None;
    }

    /// Start or stop the decay timer in lockstep with "the room
    /// containing self is started".
    fn refresh_decay(&mut self) {
        let active = self
            .state
            .me
            .as_ref()
            .and_then(|me| self.state.room_of(&me.member_id))
            .filter(|room| room.started)
            .map(|room| room.room_id.clone());

        match active {
            Some(room_id) => {
                let current = self.decay.as_ref().map(|(id, _)| id.as_str());
                if current != Some(room_id.as_str()) {
                    let mut interval = interval_at(Instant::now() + DECAY_PERIOD, DECAY_PERIOD);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.decay = Some((room_id, interval));
                }
            }
            None => {
                self.decay = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Member, Room};

    fn member(id: &str, name: &str) -> Member {
        Member {
            member_id: id.into(),
            name: name.into(),
            joined_at: String::new(),
        }
    }

    fn welcome_frame() -> String {
        serde_json::json!({
            "type": "welcome",
            "member": {"member_id": "1", "name": "Nova", "joined_at": ""},
            "members": [{"member_id": "1", "name": "Nova", "joined_at": ""}],
            "rooms": [],
        })
        .to_string()
    }

    fn connected_client() -> LobbyClient {
        let mut client = LobbyClient::new("ws://127.0.0.1:1/lobby/ws");
        client.generation = 1;
        client.status = ConnectionStatus::Connected;
        client
    }

    #[tokio::test]
    async fn stale_generation_events_are_inert() {
        let mut client = connected_client();
        let ev = client.apply(0, TransportEvent::Frame(welcome_frame()));
        assert!(ev.is_none());
        assert!(client.state.me.is_none());
        assert!(client.state.known_members.is_empty());

        let ev = client.apply(1, TransportEvent::Frame(welcome_frame()));
        assert!(matches!(ev, Some(LobbyEvent::Welcome { .. })));
        assert_eq!(client.state.known_members.len(), 1);

        // A stale close must not reset the live session either.
        let ev = client.apply(0, TransportEvent::Closed);
        assert!(ev.is_none());
        assert_eq!(client.state.known_members.len(), 1);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_silently() {
        let mut client = connected_client();
        assert!(client.apply(1, TransportEvent::Frame("{oops".into())).is_none());
        assert!(client
            .apply(1, TransportEvent::Frame(r#"{"type":"mystery"}"#.into()))
            .is_none());
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn close_resets_the_whole_session() {
        let mut client = connected_client();
        client.credential = Some(Credential {
            token: "t".into(),
            expires_at: String::new(),
            name: String::new(),
        });
        client.apply(1, TransportEvent::Frame(welcome_frame()));
        let rooms_frame = serde_json::json!({
            "type": "rooms_updated",
            "rooms": [{
                "room_id": "r1", "name": "arena", "host_id": "1", "host_name": "Nova",
                "started": true,
                "members": [{"member_id": "1", "name": "Nova", "joined_at": ""}],
            }],
        })
        .to_string();
        client.apply(1, TransportEvent::Frame(rooms_frame));
        assert!(client.sessions.get("r1").is_some());
        assert!(client.decay.is_some());

        let ev = client.apply(1, TransportEvent::Closed);
        assert!(matches!(ev, Some(LobbyEvent::Disconnected)));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.state.me.is_none());
        assert!(client.state.members.is_empty());
        assert!(client.state.rooms.is_empty());
        assert!(client.state.known_members.is_empty());
        assert!(client.sessions.get("r1").is_none());
        assert!(client.credential.is_none());
        assert!(client.decay.is_none());
    }

    #[tokio::test]
    async fn decay_timer_follows_the_active_started_room() {
        let mut client = connected_client();
        client.apply(1, TransportEvent::Frame(welcome_frame()));
        assert!(client.decay.is_none());

        let room = |started: bool, members: Vec<Member>| Room {
            room_id: "r1".into(),
            name: "arena".into(),
            host_id: "1".into(),
            host_name: "Nova".into(),
            started,
            members,
        };

        client.state.rooms = vec![room(true, vec![member("1", "Nova")])];
        client.refresh_decay();
        assert!(client.decay.is_some());

        // Leaving the room stops the timer; the session itself persists.
        client.sessions.observe_rooms(&client.state.rooms);
        client.state.rooms = vec![room(true, vec![])];
        client.refresh_decay();
        assert!(client.decay.is_none());
        assert!(client.sessions.get("r1").is_some());
    }

    #[tokio::test]
    async fn send_while_disconnected_is_a_noop_failure() {
        let mut client = LobbyClient::new("ws://127.0.0.1:1/lobby/ws");
        let err = client.send(&ClientMessage::Ping).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    fn guest_credential() -> Credential {
        Credential {
            token: "t".into(),
            expires_at: String::new(),
            name: String::new(),
        }
    }

    #[tokio::test]
    async fn reconnect_closes_the_superseded_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut first = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let _second = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Once superseded, the first socket must actually close —
            // dropping only the write half would keep the old guest
            // visible to the server forever.
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    match first.next().await {
                        None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => break,
                        Some(Ok(_)) => {}
                    }
                }
            })
            .await
            .is_ok()
        });

        let mut client = LobbyClient::new(format!("ws://{addr}/lobby/ws"));
        client.connect(None, guest_credential()).unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .unwrap();
        assert!(matches!(ev, LobbyEvent::Connected));

        client.connect(None, guest_credential()).unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .unwrap();
        assert!(matches!(ev, LobbyEvent::Connected));

        assert!(
            server.await.unwrap(),
            "superseded connection stayed open"
        );
    }

    #[test]
    fn endpoint_parse_failure_leaves_state_untouched() {
        let mut client = LobbyClient::new("not a url");
        let err = client.connect(None, guest_credential()).unwrap_err();
        assert!(matches!(err, ClientError::Endpoint(_)));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.generation, 0);
        assert!(client.credential.is_none());
    }

    #[test]
    fn connect_requires_a_credential() {
        let mut client = LobbyClient::new("ws://127.0.0.1:1/lobby/ws");
        let err = client
            .connect(
                Some("Nova"),
                Credential {
                    token: String::new(),
                    expires_at: String::new(),
                    name: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingCredential));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
