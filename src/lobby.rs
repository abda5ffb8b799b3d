//! Room registry: room-code issuance, join/leave, readiness and the
//! transition from a full, all-ready lobby into a fresh game.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::error::GameError;
use crate::game;
use crate::state::{GameState, Player};
use crate::store::Store;

pub const ROOM_CODE_LEN: usize = 6;
pub const MAX_PLAYERS: usize = 2;

/// A connected identity, keyed by session token rather than by transient
/// socket id so it survives reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub socket_id: String,
    #[serde(default)]
    pub room_code: String,
    #[serde(default)]
    pub is_ready: bool,
}

impl User {
    /// Fresh profile for a first-contact token; the client still has to
    /// supply a name and avatar.
    pub fn bare(token: impl Into<String>, socket_id: impl Into<String>) -> Self {
        User {
            id: token.into(),
            name: String::new(),
            avatar: String::new(),
            socket_id: socket_id.into(),
            room_code: String::new(),
            is_ready: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub id: String,
    pub created_at: i64,
    pub room_code: String,
    pub max_players: usize,
    pub players: Vec<User>,
}

impl Lobby {
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn all_ready(&self) -> bool {
        self.players.iter().all(|p| p.is_ready)
    }
}

pub struct RoomRegistry {
    store: Arc<Store>,
}

impl RoomRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        RoomRegistry { store }
    }

    fn generate_room_code() -> String {
        let mut rng = rand::thread_rng();
        (0..ROOM_CODE_LEN).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect()
    }

    /// Creates a lobby under a room code unused by any open lobby, retrying
    /// generation until unique. The creating user is associated with the
    /// room and marked not ready.
    pub async fn create_lobby(&self, user_id: &str) -> Result<Lobby, GameError> {
        let room_code = loop {
            let candidate = Self::generate_room_code();
            if self.store.get_lobby(&candidate).await?.is_none() {
                break candidate;
            }
        };

        let mut user = self.store.get_user(user_id).await?.ok_or(GameError::PlayerNotFound)?;
        user.room_code = room_code.clone();
        user.is_ready = false;
        self.store.set_user(&user).await?;

        let lobby = Lobby {
            id: Uuid::new_v4().to_string(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            room_code,
            max_players: MAX_PLAYERS,
            players: vec![user],
        };
        self.store.set_lobby(&lobby).await?;
        info!(room = %lobby.room_code, user = user_id, "lobby created");
        Ok(lobby)
    }

    pub async fn join_lobby(&self, room_code: &str, user_id: &str) -> Result<Lobby, GameError> {
        let mut lobby =
            self.store.get_lobby(room_code).await?.ok_or(GameError::LobbyNotFound)?;
        let mut user = self.store.get_user(user_id).await?.ok_or(GameError::PlayerNotFound)?;
        if lobby.is_full() {
            return Err(GameError::LobbyFull);
        }

        user.room_code = room_code.to_string();
        user.is_ready = false;
        self.store.set_user(&user).await?;

        lobby.players.push(user);
        self.store.set_lobby(&lobby).await?;
        info!(room = room_code, user = user_id, "player joined lobby");
        Ok(lobby)
    }

    pub async fn toggle_ready(
        &self,
        user_id: &str,
        room_code: &str,
        is_ready: bool,
    ) -> Result<Lobby, GameError> {
        let mut lobby =
            self.store.get_lobby(room_code).await?.ok_or(GameError::LobbyNotFound)?;
        let player = lobby
            .players
            .iter_mut()
            .find(|p| p.id == user_id)
            .ok_or(GameError::PlayerNotFound)?;
        player.is_ready = is_ready;
        self.store.set_lobby(&lobby).await?;
        Ok(lobby)
    }

    /// Removes the player; the last player out deletes the lobby record.
    /// The leaving user's room-code association is cleared either way.
    pub async fn leave_lobby(
        &self,
        user_id: &str,
        room_code: &str,
    ) -> Result<Option<Lobby>, GameError> {
        let mut lobby =
            self.store.get_lobby(room_code).await?.ok_or(GameError::LobbyNotFound)?;

        if let Some(mut user) = self.store.get_user(user_id).await? {
            user.room_code = String::new();
            user.is_ready = false;
            self.store.set_user(&user).await?;
        }

        lobby.players.retain(|p| p.id != user_id);
        if lobby.players.is_empty() {
            self.store.del_lobby(room_code).await;
            info!(room = room_code, "last player left, lobby deleted");
            return Ok(None);
        }
        self.store.set_lobby(&lobby).await?;
        info!(room = room_code, user = user_id, "player left lobby");
        Ok(Some(lobby))
    }

    /// Transitions a full, all-ready lobby into a freshly dealt game and
    /// retires the lobby record.
    pub async fn start_game(&self, lobby: &Lobby) -> Result<GameState, GameError> {
        if !lobby.is_full() || !lobby.all_ready() {
            return Err(GameError::PlayersNotReady);
        }

        let players = lobby
            .players
            .iter()
            .map(|u| Player::new(u.id.clone(), u.name.clone()))
            .collect();
        let state = GameState::new(Uuid::new_v4().to_string(), lobby.room_code.clone(), players);
        let state = game::deal_new_round(&state)?;

        self.store.set_game(&state).await?;
        self.store.del_lobby(&lobby.room_code).await;
        info!(room = %lobby.room_code, game = %state.id, "game started");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{DECK_SIZE, STARTING_HAND_SIZE};

    async fn store_with_users(ids: &[&str]) -> Arc<Store> {
        let store = Arc::new(Store::new());
        for id in ids {
            let mut user = User::bare(*id, "sock");
            user.name = id.to_string();
            store.set_user(&user).await.unwrap();
        }
        store
    }

    #[test]
    fn room_codes_are_six_uppercase_letters() {
        for _ in 0..64 {
            let code = RoomRegistry::generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[tokio::test]
    async fn create_lobby_associates_the_creator() {
        let store = store_with_users(&["a"]).await;
        let registry = RoomRegistry::new(store.clone());
        let lobby = registry.create_lobby("a").await.unwrap();
        assert_eq!(lobby.max_players, MAX_PLAYERS);
        assert_eq!(lobby.players.len(), 1);
        assert!(!lobby.players[0].is_ready);

        let user = store.get_user("a").await.unwrap().unwrap();
        assert_eq!(user.room_code, lobby.room_code);
        assert!(store.get_lobby(&lobby.room_code).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn join_rejects_a_full_lobby() {
        let store = store_with_users(&["a", "b", "c"]).await;
        let registry = RoomRegistry::new(store.clone());
        let lobby = registry.create_lobby("a").await.unwrap();
        registry.join_lobby(&lobby.room_code, "b").await.unwrap();
        let err = registry.join_lobby(&lobby.room_code, "c").await.unwrap_err();
        assert_eq!(err, GameError::LobbyFull);
    }

    #[tokio::test]
    async fn join_requires_an_existing_lobby_and_user() {
        let store = store_with_users(&["a"]).await;
        let registry = RoomRegistry::new(store.clone());
        assert_eq!(registry.join_lobby("NOPE42", "a").await.unwrap_err(), GameError::LobbyNotFound);
        let lobby = registry.create_lobby("a").await.unwrap();
        assert_eq!(
            registry.join_lobby(&lobby.room_code, "ghost").await.unwrap_err(),
            GameError::PlayerNotFound
        );
    }

    #[tokio::test]
    async fn leaving_last_player_deletes_the_lobby() {
        let store = store_with_users(&["a", "b"]).await;
        let registry = RoomRegistry::new(store.clone());
        let lobby = registry.create_lobby("a").await.unwrap();
        registry.join_lobby(&lobby.room_code, "b").await.unwrap();

        let remaining = registry.leave_lobby("a", &lobby.room_code).await.unwrap().unwrap();
        assert_eq!(remaining.players.len(), 1);
        assert!(store.get_user("a").await.unwrap().unwrap().room_code.is_empty());

        let gone = registry.leave_lobby("b", &lobby.room_code).await.unwrap();
        assert!(gone.is_none());
        assert!(store.get_lobby(&lobby.room_code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_game_needs_a_full_ready_lobby() {
        let store = store_with_users(&["a", "b"]).await;
        let registry = RoomRegistry::new(store.clone());
        let lobby = registry.create_lobby("a").await.unwrap();
        assert_eq!(registry.start_game(&lobby).await.unwrap_err(), GameError::PlayersNotReady);

        registry.join_lobby(&lobby.room_code, "b").await.unwrap();
        registry.toggle_ready("a", &lobby.room_code, true).await.unwrap();
        let lobby = registry.toggle_ready("b", &lobby.room_code, true).await.unwrap();

        let state = registry.start_game(&lobby).await.unwrap();
        assert_eq!(state.lobby.len(), 2);
        for player in &state.lobby {
            assert_eq!(player.hand.len(), STARTING_HAND_SIZE);
            assert_eq!(player.phase, 1);
            assert!(player.piles.is_empty());
        }
        assert!(state.top_discard().is_some());
        assert_eq!(state.deck.len(), DECK_SIZE - 2 * STARTING_HAND_SIZE - 1);
        assert!((0..2).contains(&state.current_player_index));
        // The lobby record is retired once the game exists.
        assert!(store.get_lobby(&lobby.room_code).await.unwrap().is_none());
        assert!(store.get_game(&lobby.room_code).await.unwrap().is_some());
    }
}
