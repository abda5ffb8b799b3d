//! Key-value persistence for profiles, lobbies and game snapshots, plus the
//! per-room serialization locks.
//!
//! Records are JSON strings keyed `user:<token>`, `lobby:<roomCode>` and
//! `game:<roomCode>`. Handlers follow a read-before-mutate, write-after
//! discipline; to keep concurrent events for the same room strictly ordered,
//! every mutating handler holds that room's lock across the whole
//! read-mutate-write span. Events for different rooms stay independent.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::GameError;
use crate::lobby::{Lobby, User};
use crate::state::GameState;

fn user_key(token: &str) -> String {
    format!("user:{}", token)
}

fn lobby_key(room_code: &str) -> String {
    format!("lobby:{}", room_code)
}

fn game_key(room_code: &str) -> String {
    format!("game:{}", room_code)
}

#[derive(Default)]
pub struct Store {
    entries: DashMap<String, String>,
    room_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialization lock for one room; hold it for the full
    /// read-mutate-write span of any handler touching that room.
    pub fn room_lock(&self, room_code: &str) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn set_raw(&self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    async fn del_raw(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops the room's lock entry once neither a lobby nor a game record
    /// remains for it. Handlers still holding the old `Arc` are finishing
    /// work against the retired room; new room codes get a fresh lock.
    fn release_room_if_retired(&self, room_code: &str) {
        if !self.entries.contains_key(&lobby_key(room_code))
            && !self.entries.contains_key(&game_key(room_code))
        {
            self.room_locks.remove(room_code);
        }
    }

    pub async fn get_user(&self, token: &str) -> Result<Option<User>, GameError> {
        match self.get_raw(&user_key(token)).await {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set_user(&self, user: &User) -> Result<(), GameError> {
        self.set_raw(user_key(&user.id), serde_json::to_string(user)?).await;
        Ok(())
    }

    pub async fn get_lobby(&self, room_code: &str) -> Result<Option<Lobby>, GameError> {
        match self.get_raw(&lobby_key(room_code)).await {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set_lobby(&self, lobby: &Lobby) -> Result<(), GameError> {
        self.set_raw(lobby_key(&lobby.room_code), serde_json::to_string(lobby)?).await;
        Ok(())
    }

    pub async fn del_lobby(&self, room_code: &str) -> bool {
        let removed = self.del_raw(&lobby_key(room_code)).await;
        self.release_room_if_retired(room_code);
        removed
    }

    pub async fn get_game(&self, room_code: &str) -> Result<Option<GameState>, GameError> {
        match self.get_raw(&game_key(room_code)).await {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set_game(&self, state: &GameState) -> Result<(), GameError> {
        self.set_raw(game_key(&state.room_code), serde_json::to_string(state)?).await;
        Ok(())
    }

    pub async fn del_game(&self, room_code: &str) -> bool {
        let removed = self.del_raw(&game_key(room_code)).await;
        self.release_room_if_retired(room_code);
        removed
    }
}
