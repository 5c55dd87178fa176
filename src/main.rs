//! Interactive terminal driver for the atrium lobby client.
//!
//! Wires the client event pump to stdin commands: one `tokio::select!`
//! loop owns all state, so transport events, user actions, and decay
//! ticks interleave without locking.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use atrium::session::now_ms;
use atrium::{
    request_guest_credential, ClientMessage, ConnectionStatus, LobbyClient, LobbyEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atrium=info".parse().unwrap()),
        )
        .init();

    let api_url =
        std::env::var("ATRIUM_API").unwrap_or_else(|_| "http://127.0.0.1:8000".into());
    let ws_url = std::env::var("ATRIUM_WS").unwrap_or_else(|_| default_ws_url(&api_url));
    let name = std::env::var("ATRIUM_NAME").ok();

    let http = reqwest::Client::new();
    let mut client = LobbyClient::new(ws_url);

    join_lobby(&http, &api_url, name.as_deref(), &mut client).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("atrium lobby client — type `help` for commands");

    loop {
        tokio::select! {
            event = client.next_event() => render_event(&client, &event),
            line = lines.next_line() => {
                let Some(line) = line.context("stdin closed")? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" {
                    client.close();
                    break;
                }
                handle_command(&http, &api_url, name.as_deref(), &mut client, line).await;
            }
        }
    }

    tracing::info!("bye");
    Ok(())
}

/// Derive the lobby WebSocket endpoint from the API base URL.
fn default_ws_url(api_url: &str) -> String {
    let ws_base = api_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{}/api/v1/lobby/ws", ws_base.trim_end_matches('/'))
}

/// Request a fresh guest credential and connect. Tokens are single-claim,
/// so every (re)connect starts here.
async fn join_lobby(
    http: &reqwest::Client,
    api_url: &str,
    name: Option<&str>,
    client: &mut LobbyClient,
) {
    match request_guest_credential(http, api_url, name).await {
        Ok(credential) => {
            tracing::info!(name = %credential.name, "guest credential issued");
            if let Err(e) = client.connect(name, credential) {
                tracing::error!("connect failed: {e}");
            }
        }
        Err(e) => tracing::error!("{e} — retry with `reconnect`"),
    }
}

fn render_event(client: &LobbyClient, event: &LobbyEvent) {
    match event {
        LobbyEvent::Connected => tracing::info!("connected to the lobby"),
        LobbyEvent::Disconnected => tracing::info!("disconnected — session reset"),
        LobbyEvent::ConnectionError { message } => tracing::error!("connection error: {message}"),
        LobbyEvent::Welcome { member } => {
            println!(
                "welcome {} — {} members, {} rooms",
                member.name,
                client.state.members.len(),
                client.state.rooms.len()
            );
        }
        LobbyEvent::MemberJoined(m) => println!("+ {} joined the lobby", m.name),
        LobbyEvent::MemberLeft(m) => println!("- {} left the lobby", m.name),
        LobbyEvent::MemberRenamed(m) => println!("~ {} renamed to {}", m.member_id, m.name),
        LobbyEvent::RoomsUpdated { count } => println!("rooms updated ({count})"),
        LobbyEvent::RoomError { message } => println!("! {message}"),
        LobbyEvent::Pong => tracing::debug!("pong"),
        LobbyEvent::SessionTick { .. } => {}
    }
}

async fn handle_command(
    http: &reqwest::Client,
    api_url: &str,
    name: Option<&str>,
    client: &mut LobbyClient,
    line: &str,
) {
    let (cmd, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };

    let sent = match (cmd, rest) {
        ("help", _) => {
            print_help();
            Ok(())
        }
        ("rename", new_name) if !new_name.is_empty() => {
            client.send(&ClientMessage::Rename { name: new_name.into() }).await
        }
        ("create", room_name) if !room_name.is_empty() => {
            client.send(&ClientMessage::CreateRoom { name: room_name.into() }).await
        }
        ("join", room_id) if !room_id.is_empty() => {
            client.send(&ClientMessage::JoinRoom { room_id: room_id.into() }).await
        }
        ("leave", _) => client.send(&ClientMessage::LeaveRoom).await,
        ("start", _) => match my_room_id(client) {
            Some(room_id) => client.send(&ClientMessage::StartGame { room_id }).await,
            None => {
                println!("you are not in a room");
                Ok(())
            }
        },
        ("ping", _) => client.send(&ClientMessage::Ping).await,
        ("reconnect", _) => {
            if client.status() == ConnectionStatus::Connected {
                client.close();
            }
            join_lobby(http, api_url, name, client).await;
            Ok(())
        }
        ("members", _) => {
            for m in &client.state.members {
                println!("{}  {}", m.member_id, m.name);
            }
            Ok(())
        }
        ("rooms", _) => {
            for r in &client.state.rooms {
                println!(
                    "{}  {} (host {}, {} members{})",
                    r.room_id,
                    r.name,
                    r.host_name,
                    r.members.len(),
                    if r.started { ", started" } else { "" }
                );
            }
            if let Some(err) = &client.state.room_error {
                println!("! {err}");
            }
            Ok(())
        }
        ("who", _) => {
            for row in client.state.statuses() {
                match &row.room {
                    Some((_, room_name)) => {
                        println!("{:<12} {} ({})", row.status.as_str(), row.name, room_name)
                    }
                    None => println!("{:<12} {}", row.status.as_str(), row.name),
                }
            }
            Ok(())
        }
        ("session", _) => {
            print_session(client);
            Ok(())
        }
        ("boost", "") => with_session(client, |session, me| session.boost_self(&me, now_ms())),
        ("boost", target) => {
            let target = target.to_string();
            with_session(client, |session, _| session.boost_player(&target, now_ms()))
        }
        ("focus", _) => with_session(client, |session, me| session.sharpen_focus(&me, now_ms())),
        ("ready", _) => with_session(client, |session, me| session.toggle_ready(&me, now_ms())),
        ("pulse", _) => with_session(client, |session, _| session.pulse(now_ms())),
        _ => {
            println!("unknown or incomplete command: {cmd} (try `help`)");
            Ok(())
        }
    };

    if let Err(e) = sent {
        tracing::warn!("{e}");
    }
}

fn my_room_id(client: &LobbyClient) -> Option<String> {
    let me = client.state.me.as_ref()?;
    client.state.room_of(&me.member_id).map(|r| r.room_id.clone())
}

/// Run a simulation action against the session of the room self occupies.
fn with_session(
    client: &mut LobbyClient,
    action: impl FnOnce(&mut atrium::SessionState, String),
) -> Result<(), atrium::ClientError> {
    let Some(me) = client.state.me.as_ref().map(|m| m.member_id.clone()) else {
        println!("not in the lobby yet");
        return Ok(());
    };
    let Some(room_id) = my_room_id(client) else {
        println!("you are not in a room");
        return Ok(());
    };
    match client.sessions.get_mut(&room_id) {
        Some(session) => {
            action(session, me);
            if let Some(session) = client.sessions.get(&room_id) {
                println!("{}", session.last_event);
            }
        }
        None => println!("no session yet — the room has not started"),
    }
    Ok(())
}

fn print_session(client: &LobbyClient) {
    let Some(room_id) = my_room_id(client) else {
        println!("you are not in a room");
        return;
    };
    let Some(session) = client.sessions.get(&room_id) else {
        println!("no session yet — the room has not started");
        return;
    };
    println!(
        "room {}  activity {}  pulses {}  last: {}",
        session.room_id,
        session.activity,
        session.pulse_count,
        if session.last_event.is_empty() { "-" } else { &session.last_event }
    );
    let mut players: Vec<_> = session.players.values().collect();
    players.sort_by(|a, b| a.name.cmp(&b.name));
    for p in players {
        println!(
            "  {:<16} energy {:>3}  focus {:>3}  {}",
            p.name,
            p.energy,
            p.focus,
            if p.ready { "ready" } else { "not ready" }
        );
    }
}

fn print_help() {
    println!("lobby:    rename <name> | create <room> | join <room_id> | leave | start");
    println!("queries:  members | rooms | who | session");
    println!("session:  boost [member_id] | focus | ready | pulse");
    println!("misc:     ping | reconnect | quit");
}
