//! Card taxonomy, deck construction and dealing.
//!
//! A deck is exactly 108 cards: two regular cards per color/number pair
//! (4 colors x 12 numbers), 4 skip cards and 8 wild cards. Card ids are
//! stable for the lifetime of a round and unique across the deck.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

pub const DECK_SIZE: usize = 108;
pub const STARTING_HAND_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Blue,
    Yellow,
    Green,
}

impl Color {
    pub const ALL: [Color; 4] = [Color::Red, Color::Blue, Color::Yellow, Color::Green];

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Blue => "blue",
            Color::Yellow => "yellow",
            Color::Green => "green",
        }
    }

    // Fixed hand ordering: blue < green < red < yellow.
    fn sort_rank(self) -> u8 {
        match self {
            Color::Blue => 1,
            Color::Green => 2,
            Color::Red => 3,
            Color::Yellow => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Regular,
    Skip,
    Wild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u8>,
    #[serde(rename = "type")]
    pub kind: CardKind,
}

impl Card {
    pub fn regular(color: Color, number: u8, copy: u8) -> Self {
        Card {
            id: format!("{}_{}_{}", color.as_str(), number, copy),
            color: Some(color),
            number: Some(number),
            kind: CardKind::Regular,
        }
    }

    pub fn skip(index: u8) -> Self {
        Card { id: format!("skip_{}", index), color: None, number: None, kind: CardKind::Skip }
    }

    pub fn wild(index: u8) -> Self {
        Card { id: format!("wild_{}", index), color: None, number: None, kind: CardKind::Wild }
    }

    pub fn is_wild(&self) -> bool {
        self.kind == CardKind::Wild
    }

    pub fn is_skip(&self) -> bool {
        self.kind == CardKind::Skip
    }
}

/// Deterministic construction of the full 108-card deck.
pub fn build_deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(DECK_SIZE);
    for color in Color::ALL {
        for number in 1..=12u8 {
            for copy in 1..=2u8 {
                deck.push(Card::regular(color, number, copy));
            }
        }
    }
    for i in 1..=4u8 {
        deck.push(Card::skip(i));
    }
    for i in 1..=8u8 {
        deck.push(Card::wild(i));
    }
    deck
}

/// Uniform random permutation of `deck`. The input is left untouched.
pub fn shuffle(deck: &[Card]) -> Vec<Card> {
    let mut shuffled = deck.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    shuffled
}

/// Splits off the first `count` cards. Fails softly: when the deck holds
/// fewer than `count` cards the dealt portion is short and the remainder
/// empties; callers must treat an empty remainder as deck exhaustion.
pub fn deal(deck: &[Card], count: usize) -> (Vec<Card>, Vec<Card>) {
    let count = count.min(deck.len());
    (deck[..count].to_vec(), deck[count..].to_vec())
}

/// Stable hand ordering by color then ascending number; colorless cards
/// (skip/wild) sort after all colored cards.
pub fn sort_hand(hand: &[Card]) -> Vec<Card> {
    let mut sorted = hand.to_vec();
    sorted.sort_by_key(|c| (c.color.map_or(u8::MAX, Color::sort_rank), c.number.unwrap_or(0)));
    sorted
}

/// End-of-round scoring for the cards left in a hand.
pub fn hand_points(hand: &[Card]) -> u32 {
    hand.iter()
        .map(|card| match card.kind {
            CardKind::Wild => 25,
            CardKind::Skip => 15,
            CardKind::Regular if card.number.unwrap_or(0) >= 10 => 10,
            CardKind::Regular => 5,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn deck_has_expected_composition() {
        let deck = build_deck();
        assert_eq!(deck.len(), DECK_SIZE);

        let ids: HashSet<&str> = deck.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), DECK_SIZE, "card ids must be unique");

        let regulars = deck.iter().filter(|c| c.kind == CardKind::Regular).count();
        let skips = deck.iter().filter(|c| c.is_skip()).count();
        let wilds = deck.iter().filter(|c| c.is_wild()).count();
        assert_eq!((regulars, skips, wilds), (96, 4, 8));

        for color in Color::ALL {
            for number in 1..=12u8 {
                let copies = deck
                    .iter()
                    .filter(|c| c.color == Some(color) && c.number == Some(number))
                    .count();
                assert_eq!(copies, 2, "{} {} should appear twice", color.as_str(), number);
            }
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let deck = build_deck();
        let shuffled = shuffle(&deck);
        assert_eq!(shuffled.len(), deck.len());
        let before: HashSet<&str> = deck.iter().map(|c| c.id.as_str()).collect();
        let after: HashSet<&str> = shuffled.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn deal_preserves_cards() {
        let deck = build_deck();
        let (dealt, remaining) = deal(&deck, 10);
        assert_eq!(dealt.len(), 10);
        assert_eq!(dealt.len() + remaining.len(), deck.len());
        assert_eq!(dealt, deck[..10].to_vec());
    }

    #[test]
    fn deal_more_than_available_empties_the_deck() {
        let deck = build_deck();
        let (dealt, remaining) = deal(&deck[..3], 10);
        assert_eq!(dealt.len(), 3);
        assert!(remaining.is_empty());
    }

    #[test]
    fn sort_hand_orders_colors_then_numbers_with_colorless_last() {
        let hand = vec![
            Card::wild(1),
            Card::regular(Color::Yellow, 2, 1),
            Card::regular(Color::Blue, 9, 1),
            Card::skip(1),
            Card::regular(Color::Blue, 3, 1),
            Card::regular(Color::Green, 7, 1),
        ];
        let sorted = sort_hand(&hand);
        let ids: Vec<&str> = sorted.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["blue_3_1", "blue_9_1", "green_7_1", "yellow_2_1", "wild_1", "skip_1"]);
    }

    #[test]
    fn hand_points_follow_score_table() {
        let hand = vec![
            Card::wild(1),                       // 25
            Card::skip(1),                       // 15
            Card::regular(Color::Red, 10, 1),    // 10
            Card::regular(Color::Red, 12, 1),    // 10
            Card::regular(Color::Blue, 9, 1),    // 5
            Card::regular(Color::Green, 1, 1),   // 5
        ];
        assert_eq!(hand_points(&hand), 70);
    }
}
