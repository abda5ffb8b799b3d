//! Canonical per-room game state and its pure transition functions.
//!
//! Every transform takes the prior snapshot by reference and returns a new
//! snapshot; the input is never mutated. Structural violations (player or
//! pile index out of range) fail without producing a partial state, so a
//! handler that errors leaves the persisted snapshot untouched.

use serde::{Deserialize, Serialize};

use crate::cards::Card;
use crate::error::GameError;

/// Phase value marking a player who has completed phase 10 and won.
pub const PHASE_WON: u8 = 11;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub hand: Vec<Card>,
    pub phase: u8,
    pub piles: Vec<Vec<Card>>,
    pub points: u32,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Player {
            id: id.into(),
            name: name.into(),
            hand: Vec::new(),
            phase: 1,
            piles: Vec::new(),
            points: 0,
        }
    }

    pub fn has_won(&self) -> bool {
        self.phase >= PHASE_WON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnStage {
    /// The current player must draw from the deck or take the discard.
    AwaitingDraw,
    /// The current player may meld, then must discard to end the turn.
    AwaitingAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub id: String,
    pub room_code: String,
    pub deck: Vec<Card>,
    /// Face-up discard stack; the last element is the visible, takeable top.
    /// Covered cards stay in the pile so no card ever leaves the round.
    pub discard_pile: Vec<Card>,
    pub lobby: Vec<Player>,
    /// Index into `lobby`, or -1 before the first deal.
    pub current_player_index: i32,
    pub is_joinable: bool,
    pub turn_stage: TurnStage,
}

impl GameState {
    pub fn new(id: impl Into<String>, room_code: impl Into<String>, players: Vec<Player>) -> Self {
        GameState {
            id: id.into(),
            room_code: room_code.into(),
            deck: Vec::new(),
            discard_pile: Vec::new(),
            lobby: players,
            current_player_index: -1,
            is_joinable: false,
            turn_stage: TurnStage::AwaitingDraw,
        }
    }

    pub fn player_index_by_id(&self, id: &str) -> Option<usize> {
        self.lobby.iter().position(|p| p.id == id)
    }

    pub fn player_index_by_name(&self, name: &str) -> Option<usize> {
        self.lobby.iter().position(|p| p.name == name)
    }

    pub fn player(&self, index: usize) -> Result<&Player, GameError> {
        self.lobby.get(index).ok_or(GameError::PlayerNotFound)
    }

    pub fn top_discard(&self) -> Option<&Card> {
        self.discard_pile.last()
    }

    /// Every card currently tracked by this state: deck, discard, all hands
    /// and all pile entries. Used to check the conservation invariant.
    pub fn all_cards(&self) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self.deck.iter().collect();
        cards.extend(self.discard_pile.iter());
        for player in &self.lobby {
            cards.extend(player.hand.iter());
            for pile in &player.piles {
                cards.extend(pile.iter());
            }
        }
        cards
    }

    pub fn with_discard_pushed(&self, card: Card) -> GameState {
        let mut next = self.clone();
        next.discard_pile.push(card);
        next
    }

    /// Removes the top discard; a no-op on an empty pile.
    pub fn with_discard_popped(&self) -> GameState {
        let mut next = self.clone();
        next.discard_pile.pop();
        next
    }

    pub fn with_discard_pile(&self, pile: Vec<Card>) -> GameState {
        let mut next = self.clone();
        next.discard_pile = pile;
        next
    }

    pub fn with_deck(&self, deck: Vec<Card>) -> GameState {
        let mut next = self.clone();
        next.deck = deck;
        next
    }

    pub fn with_player_hand(&self, index: usize, hand: Vec<Card>) -> Result<GameState, GameError> {
        let mut next = self.clone();
        next.lobby.get_mut(index).ok_or(GameError::PlayerNotFound)?.hand = hand;
        Ok(next)
    }

    /// Appends a freshly-laid meld as a new pile for the player.
    pub fn with_pile_pushed(&self, index: usize, meld: Vec<Card>) -> Result<GameState, GameError> {
        let mut next = self.clone();
        next.lobby.get_mut(index).ok_or(GameError::PlayerNotFound)?.piles.push(meld);
        Ok(next)
    }

    /// Appends cards onto an existing pile.
    pub fn with_pile_extended(
        &self,
        player_index: usize,
        pile_index: usize,
        cards: Vec<Card>,
    ) -> Result<GameState, GameError> {
        let mut next = self.clone();
        let player = next.lobby.get_mut(player_index).ok_or(GameError::PlayerNotFound)?;
        let pile = player.piles.get_mut(pile_index).ok_or(GameError::PileNotFound)?;
        pile.extend(cards);
        Ok(next)
    }

    pub fn with_player_phase(&self, index: usize, phase: u8) -> Result<GameState, GameError> {
        let mut next = self.clone();
        next.lobby.get_mut(index).ok_or(GameError::PlayerNotFound)?.phase = phase;
        Ok(next)
    }

    pub fn with_player_points(&self, index: usize, points: u32) -> Result<GameState, GameError> {
        let mut next = self.clone();
        next.lobby.get_mut(index).ok_or(GameError::PlayerNotFound)?.points = points;
        Ok(next)
    }

    pub fn with_player_index(&self, index: i32) -> GameState {
        let mut next = self.clone();
        next.current_player_index = index;
        next
    }

    pub fn with_turn_stage(&self, stage: TurnStage) -> GameState {
        let mut next = self.clone();
        next.turn_stage = stage;
        next
    }

    /// Round-robin turn advance; the -1 sentinel yields the first player.
    pub fn advance_turn(&self) -> GameState {
        let mut next = self.clone();
        if next.lobby.is_empty() {
            return next;
        }
        next.current_player_index = if next.current_player_index < 0 {
            0
        } else {
            (next.current_player_index + 1) % next.lobby.len() as i32
        };
        next
    }

    pub fn reset_hands(&self) -> GameState {
        let mut next = self.clone();
        for player in &mut next.lobby {
            player.hand.clear();
        }
        next
    }

    pub fn reset_piles(&self) -> GameState {
        let mut next = self.clone();
        for player in &mut next.lobby {
            player.piles.clear();
        }
        next
    }
}
