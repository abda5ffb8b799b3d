//! Typed failures for every player-visible and structural error.
//!
//! Validation errors are reported only to the originating connection and
//! never mutate the persisted room snapshot.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("it's not your turn")]
    NotYourTurn,
    #[error("invalid card")]
    InvalidCard,
    #[error("no card in the discard pile to take")]
    NoActiveDiscard,
    #[error("you cannot pick up a skip card")]
    SkipCardLocked,
    #[error("the deck is exhausted")]
    DeckExhausted,
    #[error("you have already drawn this turn")]
    AlreadyDrawn,
    #[error("you must draw a card first")]
    MustDrawFirst,
    #[error("player not found")]
    PlayerNotFound,
    #[error("lobby not found")]
    LobbyNotFound,
    #[error("lobby is full")]
    LobbyFull,
    #[error("all players must be ready")]
    PlayersNotReady,
    #[error("game not found")]
    GameNotFound,
    #[error("pile not found")]
    PileNotFound,
    #[error("phase requirements not met")]
    PhaseIncomplete,
    #[error("phase already laid down this round")]
    PhaseAlreadyLaid,
    #[error("those cards cannot extend that pile")]
    InvalidMeldExtension,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for GameError {
    fn from(err: serde_json::Error) -> Self {
        GameError::Storage(err.to_string())
    }
}
