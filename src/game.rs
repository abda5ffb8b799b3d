//! Turn coordination: validates each player action against the persisted
//! room snapshot, applies the pure transforms, and writes the new snapshot.
//!
//! Turn protocol per player turn: AwaitingDraw (draw from the deck or take
//! the discard) then AwaitingAction (optionally meld, then discard exactly
//! one card). Discarding completes the turn in one step. Discarding a skip
//! card keeps the turn with the discarding player; any other discard passes
//! it to the opponent.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use crate::cards::{self, Card, CardKind, STARTING_HAND_SIZE};
use crate::error::GameError;
use crate::phase;
use crate::state::{GameState, TurnStage};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub state: GameState,
    pub drawn: Card,
}

#[derive(Debug, Clone)]
pub struct TakeDiscardOutcome {
    pub state: GameState,
    pub taken: Card,
}

#[derive(Debug, Clone)]
pub struct RoundEnd {
    /// Name of the player whose hand reached zero.
    pub finisher: String,
    /// `Some(name)` ends the game; otherwise the next round has been dealt.
    pub winner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscardOutcome {
    pub state: GameState,
    pub discarded: Card,
    pub turn_passed: bool,
    pub round_end: Option<RoundEnd>,
}

#[derive(Debug, Clone)]
pub struct MeldOutcome {
    pub state: GameState,
    pub player_index: usize,
}

/// Deals a fresh round into `state`: cleared hands and piles, a newly built
/// and shuffled deck, ten sorted cards per player dealt in player order, one
/// face-up discard, and a randomly chosen starting player awaiting a draw.
pub fn deal_new_round(state: &GameState) -> Result<GameState, GameError> {
    let mut next = state.reset_hands().reset_piles();
    let mut remaining = cards::shuffle(&cards::build_deck());

    for index in 0..next.lobby.len() {
        let (hand, rest) = cards::deal(&remaining, STARTING_HAND_SIZE);
        if hand.len() < STARTING_HAND_SIZE {
            return Err(GameError::DeckExhausted);
        }
        next = next.with_player_hand(index, cards::sort_hand(&hand))?;
        remaining = rest;
    }

    let (pot, rest) = cards::deal(&remaining, 1);
    let pot_card = pot.into_iter().next().ok_or(GameError::DeckExhausted)?;

    let starting = rand::thread_rng().gen_range(0..next.lobby.len() as i32);
    Ok(next
        .with_deck(rest)
        .with_discard_pile(vec![pot_card])
        .with_player_index(starting)
        .with_turn_stage(TurnStage::AwaitingDraw))
}

pub struct TurnCoordinator {
    store: Arc<Store>,
}

impl TurnCoordinator {
    pub fn new(store: Arc<Store>) -> Self {
        TurnCoordinator { store }
    }

    async fn load(&self, room_code: &str) -> Result<GameState, GameError> {
        self.store.get_game(room_code).await?.ok_or(GameError::GameNotFound)
    }

    pub async fn draw_from_deck(
        &self,
        room_code: &str,
        user_id: &str,
    ) -> Result<DrawOutcome, GameError> {
        let state = self.load(room_code).await?;
        let index = state.player_index_by_id(user_id).ok_or(GameError::PlayerNotFound)?;
        ensure_current(&state, index)?;
        ensure_stage(&state, TurnStage::AwaitingDraw)?;
        if state.deck.is_empty() {
            return Err(GameError::DeckExhausted);
        }

        let (dealt, remaining) = cards::deal(&state.deck, 1);
        let drawn = dealt.into_iter().next().ok_or(GameError::DeckExhausted)?;

        let mut hand = state.player(index)?.hand.clone();
        hand.push(drawn.clone());
        let next = state
            .with_deck(remaining)
            .with_player_hand(index, cards::sort_hand(&hand))?
            .with_turn_stage(TurnStage::AwaitingAction);

        self.store.set_game(&next).await?;
        debug!(room = room_code, player = user_id, card = %drawn.id, "drew from deck");
        Ok(DrawOutcome { state: next, drawn })
    }

    /// Picks up the face-up discard instead of drawing. A skip card can
    /// never be taken.
    pub async fn take_discard(
        &self,
        room_code: &str,
        name: &str,
    ) -> Result<TakeDiscardOutcome, GameError> {
        let state = self.load(room_code).await?;
        let index = state.player_index_by_name(name).ok_or(GameError::PlayerNotFound)?;
        ensure_current(&state, index)?;
        ensure_stage(&state, TurnStage::AwaitingDraw)?;

        let taken = state.top_discard().cloned().ok_or(GameError::NoActiveDiscard)?;
        if taken.is_skip() {
            return Err(GameError::SkipCardLocked);
        }

        let mut hand = state.player(index)?.hand.clone();
        hand.push(taken.clone());
        let next = state
            .with_player_hand(index, hand)?
            .with_discard_popped()
            .with_turn_stage(TurnStage::AwaitingAction);

        self.store.set_game(&next).await?;
        debug!(room = room_code, player = name, card = %taken.id, "took discard card");
        Ok(TakeDiscardOutcome { state: next, taken })
    }

    /// Lays the submitted melds for the player's current phase. Melds are
    /// validated server-side: every card must come from the hand and each
    /// meld must satisfy its requirement on its own.
    pub async fn complete_phase(
        &self,
        room_code: &str,
        name: &str,
        phase_number: u8,
        set1: &[Card],
        set2: &[Card],
    ) -> Result<MeldOutcome, GameError> {
        let state = self.load(room_code).await?;
        let index = state.player_index_by_name(name).ok_or(GameError::PlayerNotFound)?;
        ensure_current(&state, index)?;
        ensure_stage(&state, TurnStage::AwaitingAction)?;

        let player = state.player(index)?;
        if phase_number != player.phase {
            return Err(GameError::PhaseIncomplete);
        }
        if !player.piles.is_empty() {
            return Err(GameError::PhaseAlreadyLaid);
        }

        let requirements = phase::phase_requirements(phase_number);
        let meld1 = from_hand(&player.hand, set1)?;
        let meld2 = match requirements.len() {
            1 if set2.is_empty() => Vec::new(),
            1 => return Err(GameError::InvalidCard),
            2 => from_hand(&player.hand, set2)?,
            _ => return Err(GameError::PhaseIncomplete),
        };

        let mut seen = HashSet::new();
        for card in meld1.iter().chain(meld2.iter()) {
            if !seen.insert(card.id.as_str()) {
                return Err(GameError::InvalidCard);
            }
        }

        if !phase::meld_satisfies(&meld1, requirements[0]) {
            return Err(GameError::PhaseIncomplete);
        }
        if let Some(second) = requirements.get(1) {
            if !phase::meld_satisfies(&meld2, *second) {
                return Err(GameError::PhaseIncomplete);
            }
        }

        let remaining: Vec<Card> = player
            .hand
            .iter()
            .filter(|c| !seen.contains(c.id.as_str()))
            .cloned()
            .collect();
        let new_phase = player.phase + 1;

        let mut next = state.with_pile_pushed(index, meld1)?;
        if !meld2.is_empty() {
            next = next.with_pile_pushed(index, meld2)?;
        }
        let next = next.with_player_hand(index, remaining)?.with_player_phase(index, new_phase)?;

        self.store.set_game(&next).await?;
        info!(room = room_code, player = name, phase = phase_number, "phase completed");
        Ok(MeldOutcome { state: next, player_index: index })
    }

    /// Extends an already-melded pile (own or opponent's) with cards from
    /// the acting player's hand. Only a player who has laid their phase
    /// this round may extend piles.
    pub async fn play_on_pile(
        &self,
        room_code: &str,
        name: &str,
        target_player: &str,
        pile_index: usize,
        played: &[Card],
    ) -> Result<MeldOutcome, GameError> {
        let state = self.load(room_code).await?;
        let index = state.player_index_by_name(name).ok_or(GameError::PlayerNotFound)?;
        ensure_current(&state, index)?;
        ensure_stage(&state, TurnStage::AwaitingAction)?;

        let player = state.player(index)?;
        if player.piles.is_empty() {
            return Err(GameError::PhaseIncomplete);
        }

        let target_index =
            state.player_index_by_name(target_player).ok_or(GameError::PlayerNotFound)?;
        let pile =
            state.player(target_index)?.piles.get(pile_index).ok_or(GameError::PileNotFound)?;

        let candidates = from_hand(&player.hand, played)?;
        let mut seen = HashSet::new();
        for card in &candidates {
            if !seen.insert(card.id.as_str()) {
                return Err(GameError::InvalidCard);
            }
        }
        if !phase::can_add_to_pile(pile, &candidates) {
            return Err(GameError::InvalidMeldExtension);
        }

        let remaining: Vec<Card> = player
            .hand
            .iter()
            .filter(|c| !seen.contains(c.id.as_str()))
            .cloned()
            .collect();
        let next = state
            .with_pile_extended(target_index, pile_index, candidates)?
            .with_player_hand(index, remaining)?;

        self.store.set_game(&next).await?;
        debug!(room = room_code, player = name, target = target_player, pile = pile_index, "played on pile");
        Ok(MeldOutcome { state: next, player_index: index })
    }

    /// Ends the turn by discarding one card from the hand. An emptied hand
    /// ends the round: points are tallied from every remaining hand, then
    /// either the game is over (a player is past phase 10) or the next
    /// round is dealt.
    pub async fn discard(
        &self,
        room_code: &str,
        name: &str,
        card_id: &str,
    ) -> Result<DiscardOutcome, GameError> {
        let state = self.load(room_code).await?;
        let index = state.player_index_by_name(name).ok_or(GameError::PlayerNotFound)?;
        ensure_current(&state, index)?;
        ensure_stage(&state, TurnStage::AwaitingAction)?;

        let player = state.player(index)?;
        let position = player
            .hand
            .iter()
            .position(|c| c.id == card_id)
            .ok_or(GameError::InvalidCard)?;
        let discarded = player.hand[position].clone();
        let mut hand = player.hand.clone();
        hand.remove(position);
        let hand_empty = hand.is_empty();

        // Pushed onto the pile, never replacing it: the covered card stays
        // in the round until the next deal.
        let next = state.with_player_hand(index, hand)?.with_discard_pushed(discarded.clone());

        if hand_empty {
            let (final_state, round_end) = self.finish_round(next, index).await?;
            return Ok(DiscardOutcome {
                state: final_state,
                discarded,
                turn_passed: false,
                round_end: Some(round_end),
            });
        }

        // Source rule: a skip discard keeps the turn with the discarder.
        let keeps_turn = discarded.kind == CardKind::Skip;
        let next = if keeps_turn {
            next.with_turn_stage(TurnStage::AwaitingDraw)
        } else {
            next.advance_turn().with_turn_stage(TurnStage::AwaitingDraw)
        };

        self.store.set_game(&next).await?;
        debug!(room = room_code, player = name, card = card_id, skip = keeps_turn, "discarded");
        Ok(DiscardOutcome { state: next, discarded, turn_passed: !keeps_turn, round_end: None })
    }

    async fn finish_round(
        &self,
        state: GameState,
        finisher_index: usize,
    ) -> Result<(GameState, RoundEnd), GameError> {
        let finisher = state.player(finisher_index)?.name.clone();

        if let Some(winner) = state.lobby.iter().find(|p| p.has_won()) {
            let winner = winner.name.clone();
            self.store.del_game(&state.room_code).await;
            info!(room = %state.room_code, winner = %winner, "game over");
            return Ok((state, RoundEnd { finisher, winner: Some(winner) }));
        }

        let mut next = state;
        for index in 0..next.lobby.len() {
            let player = next.player(index)?;
            let points = player.points + cards::hand_points(&player.hand);
            next = next.with_player_points(index, points)?;
        }

        let next = deal_new_round(&next)?;
        self.store.set_game(&next).await?;
        info!(room = %next.room_code, finisher = %finisher, "round ended, next round dealt");
        Ok((next, RoundEnd { finisher, winner: None }))
    }
}

fn ensure_current(state: &GameState, player_index: usize) -> Result<(), GameError> {
    if state.current_player_index == player_index as i32 {
        Ok(())
    } else {
        Err(GameError::NotYourTurn)
    }
}

fn ensure_stage(state: &GameState, stage: TurnStage) -> Result<(), GameError> {
    if state.turn_stage == stage {
        return Ok(());
    }
    match stage {
        TurnStage::AwaitingDraw => Err(GameError::AlreadyDrawn),
        TurnStage::AwaitingAction => Err(GameError::MustDrawFirst),
    }
}

/// Resolves submitted cards against the hand by id, returning the canonical
/// hand copies in submission order. Any card not in the hand is rejected.
fn from_hand(hand: &[Card], submitted: &[Card]) -> Result<Vec<Card>, GameError> {
    submitted
        .iter()
        .map(|card| {
            hand.iter().find(|c| c.id == card.id).cloned().ok_or(GameError::InvalidCard)
        })
        .collect()
}
