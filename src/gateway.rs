//! Websocket gateway: session handshake, event dispatch and fan-out.
//!
//! Each socket gets an unbounded channel whose receiver is forwarded to the
//! websocket by a spawned task; handlers push `ServerEvent`s into per-player
//! senders held in [`Connections`]. Handler failures are reported only to
//! the originating socket as an `error` frame and never change stored state.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GameError;
use crate::game::{RoundEnd, TurnCoordinator};
use crate::lobby::{Lobby, RoomRegistry, User};
use crate::phase;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::GameState;
use crate::store::Store;

struct ConnectionHandle {
    socket_id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Live sockets keyed by profile token. A reconnect overwrites the previous
/// handle, so each profile has at most one live connection.
#[derive(Default)]
pub struct Connections {
    handles: DashMap<String, ConnectionHandle>,
}

impl Connections {
    fn register(&self, user_id: &str, socket_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.handles.insert(
            user_id.to_string(),
            ConnectionHandle { socket_id: socket_id.to_string(), tx },
        );
    }

    /// Drops the handle only if it still belongs to this socket; a newer
    /// connection for the same profile is left alone.
    fn unregister(&self, user_id: &str, socket_id: &str) {
        self.handles.remove_if(user_id, |_, handle| handle.socket_id == socket_id);
    }

    pub fn send_to(&self, user_id: &str, event: ServerEvent) {
        if let Some(handle) = self.handles.get(user_id) {
            let _ = handle.tx.send(event);
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub registry: Arc<RoomRegistry>,
    pub coordinator: Arc<TurnCoordinator>,
    pub connections: Arc<Connections>,
}

impl AppState {
    pub fn new() -> Self {
        let store = Arc::new(Store::new());
        AppState {
            registry: Arc::new(RoomRegistry::new(store.clone())),
            coordinator: Arc::new(TurnCoordinator::new(store.clone())),
            connections: Arc::new(Connections::default()),
            store,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(WsQuery { token }): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket, token))
}

async fn handle_socket(app: AppState, socket: WebSocket, token: Option<String>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let socket_id = Uuid::new_v4().to_string();

    // Forward server events to the websocket until either side closes.
    tokio::spawn(async move {
        let mut ws_tx = ws_tx;
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode server event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let user_id = match establish_session(&app, &tx, &socket_id, token).await {
        Ok(user_id) => user_id,
        Err(err) => {
            let _ = tx.send(ServerEvent::Error { message: err.to_string() });
            return;
        }
    };
    app.connections.register(&user_id, &socket_id, tx.clone());

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(err) = dispatch(&app, &user_id, event).await {
                        let _ = tx.send(ServerEvent::Error { message: err.to_string() });
                    }
                }
                Err(err) => {
                    let _ = tx.send(ServerEvent::Error {
                        message: format!("bad frame: {}", err),
                    });
                }
            },
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    app.connections.unregister(&user_id, &socket_id);
    debug!(user = %user_id, "socket closed");
}

/// Resolves the session token into a profile, issuing a fresh token on first
/// contact, and replays lobby or game state after a reconnect.
async fn establish_session(
    app: &AppState,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    socket_id: &str,
    token: Option<String>,
) -> Result<String, GameError> {
    let token = match token {
        Some(token) if !token.is_empty() => token,
        _ => {
            let token = Uuid::new_v4().to_string();
            let _ = tx.send(ServerEvent::Token { token: token.clone() });
            app.store.set_user(&User::bare(token.clone(), socket_id)).await?;
            let _ = tx.send(ServerEvent::ShowCreateProfile);
            return Ok(token);
        }
    };

    let mut user = match app.store.get_user(&token).await? {
        Some(user) => user,
        None => {
            // Token from a previous server lifetime; start a fresh profile
            // under it so the client keeps its stored token.
            let user = User::bare(token.clone(), socket_id);
            app.store.set_user(&user).await?;
            let _ = tx.send(ServerEvent::ShowCreateProfile);
            return Ok(token);
        }
    };

    user.socket_id = socket_id.to_string();
    app.store.set_user(&user).await?;
    let _ = tx.send(ServerEvent::Profile { user: user.clone() });
    if user.name.is_empty() {
        let _ = tx.send(ServerEvent::ShowCreateProfile);
        return Ok(token);
    }

    if !user.room_code.is_empty() {
        if let Some(lobby) = app.store.get_lobby(&user.room_code).await? {
            let _ = tx.send(ServerEvent::RejoinLobby { lobby });
        } else if let Some(state) = app.store.get_game(&user.room_code).await? {
            if let Some(index) = state.player_index_by_id(&token) {
                let _ = tx.send(ServerEvent::RedirectToGame {
                    room_code: user.room_code.clone(),
                });
                for event in personal_sync(&state, index) {
                    let _ = tx.send(event);
                }
            }
        }
    }
    Ok(token)
}

async fn dispatch(app: &AppState, sender: &str, event: ClientEvent) -> Result<(), GameError> {
    match event {
        ClientEvent::Ping => {
            app.connections.send_to(sender, ServerEvent::Pong);
            Ok(())
        }
        ClientEvent::UpdateProfile { name, avatar } => {
            let mut user =
                app.store.get_user(sender).await?.ok_or(GameError::PlayerNotFound)?;
            user.name = name;
            user.avatar = avatar;
            app.store.set_user(&user).await?;
            app.connections.send_to(sender, ServerEvent::Profile { user });
            Ok(())
        }
        ClientEvent::CreateLobby { user_id } => {
            ensure_sender(sender, &user_id)?;
            let lobby = app.registry.create_lobby(sender).await?;
            app.connections.send_to(sender, ServerEvent::Lobby { lobby: Some(lobby) });
            Ok(())
        }
        ClientEvent::JoinLobby { room_code, user_id } => {
            ensure_sender(sender, &user_id)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let lobby = app.registry.join_lobby(&room_code, sender).await?;
            let joined = lobby
                .players
                .iter()
                .find(|p| p.id == sender)
                .cloned()
                .ok_or(GameError::PlayerNotFound)?;
            for player in &lobby.players {
                if player.id != sender {
                    app.connections.send_to(
                        &player.id,
                        ServerEvent::PlayerJoined { player: joined.clone() },
                    );
                }
            }
            app.connections.send_to(sender, ServerEvent::Lobby { lobby: Some(lobby) });
            Ok(())
        }
        ClientEvent::TogglePlayerReady { is_ready, user_id, room_code } => {
            ensure_sender(sender, &user_id)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let lobby = app.registry.toggle_ready(sender, &room_code, is_ready).await?;
            broadcast_lobby(
                app,
                &lobby,
                ServerEvent::PlayerReadyUpdate { user_id: sender.to_string(), is_ready },
            );
            Ok(())
        }
        ClientEvent::LeaveLobby { user_id, room_code } => {
            ensure_sender(sender, &user_id)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let remaining = app.registry.leave_lobby(sender, &room_code).await?;
            if let Some(lobby) = remaining {
                broadcast_lobby(
                    app,
                    &lobby,
                    ServerEvent::PlayerLeft { user_id: sender.to_string() },
                );
            }
            app.connections.send_to(sender, ServerEvent::Lobby { lobby: None });
            Ok(())
        }
        ClientEvent::NewGame { room_code } => {
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let lobby =
                app.store.get_lobby(&room_code).await?.ok_or(GameError::LobbyNotFound)?;
            let state = app.registry.start_game(&lobby).await?;
            for index in 0..state.lobby.len() {
                let player_id = state.lobby[index].id.clone();
                app.connections.send_to(
                    &player_id,
                    ServerEvent::RedirectToGame { room_code: room_code.clone() },
                );
                for event in personal_sync(&state, index) {
                    app.connections.send_to(&player_id, event);
                }
            }
            Ok(())
        }
        ClientEvent::DrawFromDeck { room_code, user_id } => {
            ensure_sender(sender, &user_id)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let outcome = app.coordinator.draw_from_deck(&room_code, sender).await?;
            sync_hands(app, &outcome.state, Some((sender, outcome.drawn)));
            Ok(())
        }
        ClientEvent::TakeDiscardCard { name } => {
            let (user, room_code) = profile_room(app, sender).await?;
            ensure_named(&user, &name)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let outcome = app.coordinator.take_discard(&room_code, &name).await?;
            broadcast_game(
                app,
                &outcome.state,
                ServerEvent::DiscardTaken { card: outcome.taken },
            );
            // Taking the top exposes the card beneath, if any.
            broadcast_game(
                app,
                &outcome.state,
                ServerEvent::DiscardCard { card: outcome.state.top_discard().cloned() },
            );
            sync_hands(app, &outcome.state, None);
            Ok(())
        }
        ClientEvent::Discard { name, card } => {
            let (user, room_code) = profile_room(app, sender).await?;
            ensure_named(&user, &name)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let outcome = app.coordinator.discard(&room_code, &name, &card.id).await?;
            match outcome.round_end {
                Some(round_end) => {
                    announce_round_end(app, &outcome.state, round_end);
                }
                None => {
                    broadcast_game(
                        app,
                        &outcome.state,
                        ServerEvent::DiscardCard { card: Some(outcome.discarded) },
                    );
                    sync_hands(app, &outcome.state, None);
                    sync_turns(app, &outcome.state);
                }
            }
            Ok(())
        }
        ClientEvent::PhaseComplete { name, phase_number, set1, set2 } => {
            let (user, room_code) = profile_room(app, sender).await?;
            ensure_named(&user, &name)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let outcome = app
                .coordinator
                .complete_phase(&room_code, &name, phase_number, &set1, &set2)
                .await?;
            sync_hands(app, &outcome.state, None);
            sync_piles(app, &outcome.state);
            Ok(())
        }
        ClientEvent::PlayOnPile { name, target_player, pile_index, cards } => {
            let (user, room_code) = profile_room(app, sender).await?;
            ensure_named(&user, &name)?;
            let lock = app.store.room_lock(&room_code);
            let _guard = lock.lock().await;

            let outcome = app
                .coordinator
                .play_on_pile(&room_code, &name, &target_player, pile_index, &cards)
                .await?;
            sync_hands(app, &outcome.state, None);
            sync_piles(app, &outcome.state);
            Ok(())
        }
    }
}

/// Events sent in payloads must match the socket's own profile token.
fn ensure_sender(sender: &str, claimed: &str) -> Result<(), GameError> {
    if sender == claimed {
        Ok(())
    } else {
        Err(GameError::NotYourTurn)
    }
}

/// Name-keyed game events must carry the sender's own profile name.
fn ensure_named(user: &User, claimed: &str) -> Result<(), GameError> {
    if user.name == claimed {
        Ok(())
    } else {
        Err(GameError::NotYourTurn)
    }
}

async fn profile_room(app: &AppState, sender: &str) -> Result<(User, String), GameError> {
    let user = app.store.get_user(sender).await?.ok_or(GameError::PlayerNotFound)?;
    if user.room_code.is_empty() {
        return Err(GameError::GameNotFound);
    }
    let room_code = user.room_code.clone();
    Ok((user, room_code))
}

fn broadcast_lobby(app: &AppState, lobby: &Lobby, event: ServerEvent) {
    for player in &lobby.players {
        app.connections.send_to(&player.id, event.clone());
    }
}

fn broadcast_game(app: &AppState, state: &GameState, event: ServerEvent) {
    for player in &state.lobby {
        app.connections.send_to(&player.id, event.clone());
    }
}

fn opponent_index(state: &GameState, index: usize) -> usize {
    (index + 1) % state.lobby.len()
}

/// Full per-player view of a freshly dealt game: intro, hand, piles, discard
/// and whose turn it is. Also used to replay state after a reconnect.
fn personal_sync(state: &GameState, index: usize) -> Vec<ServerEvent> {
    let player = &state.lobby[index];
    let opponent = &state.lobby[opponent_index(state, index)];
    vec![
        ServerEvent::GameStarted {
            hand: player.hand.clone(),
            phase: player.phase,
            phase_description: phase::phase_prompt(player.phase),
            opponent_name: opponent.name.clone(),
            opponent_phase: opponent.phase,
        },
        ServerEvent::Cards {
            hand: player.hand.clone(),
            opponent_hand_length: opponent.hand.len(),
            drawn_card: None,
        },
        ServerEvent::Pile {
            own_piles: player.piles.clone(),
            opponent_piles: opponent.piles.clone(),
        },
        ServerEvent::DiscardCard { card: state.top_discard().cloned() },
        ServerEvent::Turn { is_turn: state.current_player_index == index as i32 },
    ]
}

/// Sends each player their own hand and the opponent's hand length. The
/// drawn card is attached only to the drawing player's frame.
fn sync_hands(app: &AppState, state: &GameState, drawn: Option<(&str, crate::cards::Card)>) {
    for (index, player) in state.lobby.iter().enumerate() {
        let opponent = &state.lobby[opponent_index(state, index)];
        let drawn_card = match &drawn {
            Some((drawer, card)) if *drawer == player.id => Some(card.clone()),
            _ => None,
        };
        app.connections.send_to(
            &player.id,
            ServerEvent::Cards {
                hand: player.hand.clone(),
                opponent_hand_length: opponent.hand.len(),
                drawn_card,
            },
        );
    }
}

fn sync_piles(app: &AppState, state: &GameState) {
    for (index, player) in state.lobby.iter().enumerate() {
        let opponent = &state.lobby[opponent_index(state, index)];
        app.connections.send_to(
            &player.id,
            ServerEvent::Pile {
                own_piles: player.piles.clone(),
                opponent_piles: opponent.piles.clone(),
            },
        );
    }
}

fn sync_turns(app: &AppState, state: &GameState) {
    for (index, player) in state.lobby.iter().enumerate() {
        app.connections.send_to(
            &player.id,
            ServerEvent::Turn { is_turn: state.current_player_index == index as i32 },
        );
    }
}

/// Round-end fan-out: everyone learns who went out; either the game is over
/// or the already-dealt next round is synced in full.
fn announce_round_end(app: &AppState, state: &GameState, round_end: RoundEnd) {
    broadcast_game(app, state, ServerEvent::EndOfRound { name: round_end.finisher });
    match round_end.winner {
        Some(winner) => {
            broadcast_game(app, state, ServerEvent::GameOver { name: winner });
        }
        None => {
            for index in 0..state.lobby.len() {
                let player_id = state.lobby[index].id.clone();
                for event in personal_sync(state, index) {
                    app.connections.send_to(&player_id, event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connections_route_events_by_profile() {
        let connections = Connections::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        connections.register("tok-1", "sock-1", tx);

        connections.send_to("tok-1", ServerEvent::Pong);
        assert_eq!(rx.recv().await, Some(ServerEvent::Pong));

        // Unknown profiles are a no-op.
        connections.send_to("tok-2", ServerEvent::Pong);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnect_overwrites_and_stale_unregister_is_ignored() {
        let connections = Connections::default();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        connections.register("tok-1", "sock-old", old_tx);
        connections.register("tok-1", "sock-new", new_tx);

        connections.send_to("tok-1", ServerEvent::Pong);
        assert_eq!(new_rx.recv().await, Some(ServerEvent::Pong));
        assert!(old_rx.try_recv().is_err());

        // The old socket closing must not drop the new handle.
        connections.unregister("tok-1", "sock-old");
        connections.send_to("tok-1", ServerEvent::Pong);
        assert_eq!(new_rx.recv().await, Some(ServerEvent::Pong));
    }

    #[test]
    fn sender_guards_reject_mismatched_identities() {
        assert!(ensure_sender("tok-1", "tok-1").is_ok());
        assert_eq!(ensure_sender("tok-1", "tok-2").unwrap_err(), GameError::NotYourTurn);

        let mut user = User::bare("tok-1", "sock");
        user.name = "alice".into();
        assert!(ensure_named(&user, "alice").is_ok());
        assert_eq!(ensure_named(&user, "bob").unwrap_err(), GameError::NotYourTurn);
    }
}
