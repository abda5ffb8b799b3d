//! Phase-completion rule engine: set/run/color detection with wildcard
//! substitution, the per-phase requirement table, and pile-extension checks.
//!
//! Run detection is a single left-to-right greedy pass over the hand sorted
//! by ascending number, bridging gaps with wild cards as it goes. The greedy
//! order is the authoritative behavior even where a different wild placement
//! would also work.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::cards::{Card, CardKind, Color};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeldRequirement {
    Set(u8),
    Run(u8),
    Color(u8),
}

impl MeldRequirement {
    pub fn size(self) -> usize {
        match self {
            MeldRequirement::Set(n) | MeldRequirement::Run(n) | MeldRequirement::Color(n) => {
                n as usize
            }
        }
    }

    /// Player-facing prompt for this requirement.
    pub fn description(self) -> String {
        match self {
            MeldRequirement::Set(n) => format!("Set of {}", n),
            MeldRequirement::Run(n) => format!("Run of {}", n),
            MeldRequirement::Color(n) => format!("{} cards of 1 color", n),
        }
    }
}

/// Requirement table for phases 1 through 10. Unknown phases (including the
/// won-the-game sentinel 11) have no requirements.
pub fn phase_requirements(phase: u8) -> &'static [MeldRequirement] {
    use MeldRequirement::*;
    match phase {
        1 => &[Set(3), Set(3)],
        2 => &[Set(3), Run(4)],
        3 => &[Set(4), Run(4)],
        4 => &[Run(7)],
        5 => &[Run(8)],
        6 => &[Run(9)],
        7 => &[Set(4), Set(4)],
        8 => &[Color(7)],
        9 => &[Set(5), Set(2)],
        10 => &[Set(5), Set(3)],
        _ => &[],
    }
}

/// Player-facing prompt for a whole phase, e.g. "Set of 3 + Run of 4".
pub fn phase_prompt(phase: u8) -> String {
    phase_requirements(phase)
        .iter()
        .map(|r| r.description())
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Searches `hand` for `n` cards sharing a number, wilds substitutable.
///
/// Numbers are tried in ascending order; the first that qualifies wins.
/// Returns the matching regular cards in hand order, padded with wilds.
pub fn has_set(hand: &[Card], n: usize) -> (bool, Vec<Card>) {
    let mut by_number: BTreeMap<u8, Vec<Card>> = BTreeMap::new();
    let mut wilds: Vec<Card> = Vec::new();

    for card in hand {
        match card.kind {
            CardKind::Regular => {
                by_number.entry(card.number.unwrap_or(0)).or_default().push(card.clone());
            }
            CardKind::Wild => wilds.push(card.clone()),
            CardKind::Skip => {}
        }
    }

    for matching in by_number.values() {
        if matching.len() + wilds.len() >= n {
            let mut used: Vec<Card> = matching.iter().take(n).cloned().collect();
            let shortfall = n.saturating_sub(matching.len());
            used.extend(wilds.iter().take(shortfall).cloned());
            return (true, used);
        }
    }

    (false, Vec::new())
}

/// Searches `hand` for a consecutive run of `n` numbers, wilds filling gaps.
///
/// The scan walks adjacent pairs of the number-sorted hand. A gap of size g
/// between consecutive regular cards is bridged when g wilds remain,
/// consuming them; anything else resets the running sequence to the current
/// card. Wilds left over at the end of the scan may extend a too-short
/// sequence to `n`.
pub fn has_run(hand: &[Card], n: usize) -> (bool, Vec<Card>) {
    let mut sorted = hand.to_vec();
    sorted.sort_by_key(|c| c.number.unwrap_or(0));

    let mut wilds: Vec<Card> = hand.iter().filter(|c| c.is_wild()).cloned().collect();
    let mut run_count = 1usize;
    let mut used: Vec<Card> = Vec::new();
    let mut wilds_used: Vec<Card> = Vec::new();

    for i in 1..sorted.len() {
        if sorted[i].is_wild() {
            continue;
        }
        let gap = match (sorted[i].number, sorted[i - 1].number) {
            (Some(cur), Some(prev)) if cur > prev => (cur - prev - 1) as usize,
            // Duplicate numbers, or a skip/wild neighbor: not bridgeable.
            _ => usize::MAX,
        };

        if gap == 0 {
            run_count += 1;
            if !used.iter().any(|c| c.id == sorted[i - 1].id) {
                used.push(sorted[i - 1].clone());
            }
            used.push(sorted[i].clone());
        } else if gap != usize::MAX && gap <= wilds.len() {
            run_count += gap + 1;
            if !used.iter().any(|c| c.id == sorted[i - 1].id) {
                used.push(sorted[i - 1].clone());
            }
            used.push(sorted[i].clone());
            for _ in 0..gap {
                if let Some(wild) = wilds.pop() {
                    wilds_used.push(wild);
                }
            }
        } else {
            run_count = 1;
            used = vec![sorted[i].clone()];
            wilds_used.clear();
        }

        if run_count >= n {
            used.extend(wilds_used);
            return (true, used);
        }
    }

    // Leftover wilds may make up the shortfall.
    if run_count + wilds.len() >= n {
        let shortfall = n.saturating_sub(run_count);
        used.extend(wilds_used);
        used.extend(wilds.into_iter().take(shortfall));
        return (true, used);
    }

    (false, Vec::new())
}

/// Searches `hand` for `n` cards of one color, wilds substitutable.
/// Colors are tried in hand encounter order.
pub fn has_color(hand: &[Card], n: usize) -> (bool, Vec<Card>) {
    let wilds: Vec<Card> = hand.iter().filter(|c| c.is_wild()).cloned().collect();

    let mut colors: Vec<Color> = Vec::new();
    for card in hand {
        if let Some(color) = card.color {
            if !colors.contains(&color) {
                colors.push(color);
            }
        }
    }

    for color in colors {
        let color_cards: Vec<Card> =
            hand.iter().filter(|c| c.color == Some(color)).cloned().collect();
        if color_cards.len() + wilds.len() >= n {
            if color_cards.len() >= n {
                return (true, color_cards.into_iter().take(n).collect());
            }
            let shortfall = n - color_cards.len();
            let mut used = color_cards;
            used.extend(wilds.into_iter().take(shortfall));
            return (true, used);
        }
    }

    (false, Vec::new())
}

#[derive(Debug, Clone)]
pub struct PhaseEvaluation {
    pub meld1_complete: bool,
    /// `None` for single-meld phases (4, 5, 6 and 8).
    pub meld2_complete: Option<bool>,
    pub meld1_used: Vec<Card>,
    pub meld2_used: Vec<Card>,
}

impl PhaseEvaluation {
    pub fn complete(&self) -> bool {
        self.meld1_complete && self.meld2_complete.unwrap_or(true)
    }
}

/// Evaluates whether `hand` satisfies `phase`'s requirements, in order.
/// Cards consumed by the first meld are removed before the second is
/// evaluated, so no card can satisfy both.
pub fn evaluate_phase(hand: &[Card], phase: u8) -> PhaseEvaluation {
    let requirements = phase_requirements(phase);
    let Some(first) = requirements.first() else {
        return PhaseEvaluation {
            meld1_complete: false,
            meld2_complete: None,
            meld1_used: Vec::new(),
            meld2_used: Vec::new(),
        };
    };

    let (meld1_complete, meld1_used) = search(hand, *first);
    match requirements.get(1) {
        None => PhaseEvaluation { meld1_complete, meld2_complete: None, meld1_used, meld2_used: Vec::new() },
        Some(second) => {
            let remaining = without(hand, &meld1_used);
            let (meld2_complete, meld2_used) = search(&remaining, *second);
            PhaseEvaluation {
                meld1_complete,
                meld2_complete: Some(meld2_complete),
                meld1_used,
                meld2_used,
            }
        }
    }
}

fn search(hand: &[Card], requirement: MeldRequirement) -> (bool, Vec<Card>) {
    match requirement {
        MeldRequirement::Set(n) => has_set(hand, n as usize),
        MeldRequirement::Run(n) => has_run(hand, n as usize),
        MeldRequirement::Color(n) => has_color(hand, n as usize),
    }
}

fn without(hand: &[Card], used: &[Card]) -> Vec<Card> {
    hand.iter().filter(|c| !used.iter().any(|u| u.id == c.id)).cloned().collect()
}

/// Checks a meld submitted for phase completion against its requirement:
/// exactly the required size, no skip cards, and internally consistent as a
/// set, run or color group.
pub fn meld_satisfies(cards: &[Card], requirement: MeldRequirement) -> bool {
    if cards.len() != requirement.size() || cards.iter().any(Card::is_skip) {
        return false;
    }
    match requirement {
        MeldRequirement::Set(_) => is_set(cards),
        MeldRequirement::Run(_) => is_run(cards),
        MeldRequirement::Color(_) => is_color_group(cards),
    }
}

/// Whether `candidates` may be appended to an already-melded pile.
///
/// The pile is classified by its non-wild cards (set, then run, then color
/// group) and the extension must preserve that classification.
pub fn can_add_to_pile(pile: &[Card], candidates: &[Card]) -> bool {
    if pile.is_empty() || candidates.is_empty() {
        return false;
    }
    let combined: Vec<Card> = pile.iter().chain(candidates.iter()).cloned().collect();
    if is_set(pile) {
        is_set(&combined)
    } else if is_run(pile) {
        is_run(&combined)
    } else if is_color_group(pile) {
        is_color_group(&combined)
    } else {
        false
    }
}

fn is_set(cards: &[Card]) -> bool {
    let numbers: BTreeSet<Option<u8>> =
        cards.iter().filter(|c| !c.is_wild()).map(|c| c.number).collect();
    numbers.len() == 1 && !numbers.contains(&None)
}

// Strictly increasing numbers with every gap coverable by the wilds present.
fn is_run(cards: &[Card]) -> bool {
    let mut numbers: Vec<u8> =
        cards.iter().filter(|c| !c.is_wild()).filter_map(|c| c.number).collect();
    if numbers.len() + cards.iter().filter(|c| c.is_wild()).count() != cards.len() {
        return false; // a skip card can never sit in a run
    }
    numbers.sort_unstable();

    let wilds = cards.iter().filter(|c| c.is_wild()).count();
    let mut wilds_needed = 0usize;
    for pair in numbers.windows(2) {
        if pair[1] == pair[0] {
            return false;
        }
        wilds_needed += (pair[1] - pair[0] - 1) as usize;
    }
    wilds_needed <= wilds
}

fn is_color_group(cards: &[Card]) -> bool {
    let colors: HashSet<Option<Color>> =
        cards.iter().filter(|c| !c.is_wild()).map(|c| c.color).collect();
    colors.len() == 1 && !colors.contains(&None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::Card;

    fn regular(color: Color, number: u8, copy: u8) -> Card {
        Card::regular(color, number, copy)
    }

    #[test]
    fn set_of_two_naturals_and_a_wild() {
        let hand = vec![
            regular(Color::Red, 12, 1),
            regular(Color::Blue, 12, 1),
            Card::wild(1),
        ];
        let (ok, used) = has_set(&hand, 3);
        assert!(ok);
        assert_eq!(used.len(), 3);
        let ids: Vec<&str> = used.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["red_12_1", "blue_12_1", "wild_1"]);
    }

    #[test]
    fn set_fails_without_a_shared_number() {
        let hand = vec![
            regular(Color::Red, 12, 1),
            regular(Color::Blue, 11, 1),
            Card::wild(1),
        ];
        let (ok, used) = has_set(&hand, 3);
        assert!(!ok);
        assert!(used.is_empty());
    }

    #[test]
    fn set_prefers_the_lowest_qualifying_number() {
        let hand = vec![
            regular(Color::Red, 9, 1),
            regular(Color::Blue, 9, 1),
            regular(Color::Red, 4, 1),
            regular(Color::Blue, 4, 1),
        ];
        let (ok, used) = has_set(&hand, 2);
        assert!(ok);
        assert!(used.iter().all(|c| c.number == Some(4)));
    }

    #[test]
    fn run_bridges_a_gap_with_a_wild_and_ignores_strays() {
        // 12, 6, wild, 11 asking for a run of 3: {11, 12, wild}, 6 unused.
        let hand = vec![
            regular(Color::Red, 12, 1),
            regular(Color::Green, 6, 1),
            Card::wild(1),
            regular(Color::Blue, 11, 1),
        ];
        let (ok, used) = has_run(&hand, 3);
        assert!(ok);
        let ids: Vec<&str> = used.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["blue_11_1", "red_12_1", "wild_1"]);
    }

    #[test]
    fn run_consumes_wilds_to_fill_interior_gaps() {
        // 3, 5, 6 with one wild: run of 4 via 3 _ 5 6.
        let hand = vec![
            regular(Color::Red, 3, 1),
            regular(Color::Blue, 5, 1),
            regular(Color::Blue, 6, 1),
            Card::wild(2),
        ];
        let (ok, used) = has_run(&hand, 4);
        assert!(ok);
        assert_eq!(used.len(), 4);
        assert!(used.iter().any(|c| c.id == "wild_2"));
    }

    #[test]
    fn run_fails_when_gaps_exceed_wild_count() {
        let hand = vec![
            regular(Color::Red, 1, 1),
            regular(Color::Blue, 5, 1),
            regular(Color::Green, 9, 1),
            Card::wild(1),
        ];
        let (ok, used) = has_run(&hand, 4);
        assert!(!ok);
        assert!(used.is_empty());
    }

    #[test]
    fn color_group_of_seven_naturals_uses_no_wilds() {
        let mut hand: Vec<Card> = (1..=7).map(|n| regular(Color::Green, n, 1)).collect();
        hand.push(Card::wild(1));
        let (ok, used) = has_color(&hand, 7);
        assert!(ok);
        assert_eq!(used.len(), 7);
        assert!(used.iter().all(|c| c.color == Some(Color::Green)));
    }

    #[test]
    fn color_group_pads_with_wilds() {
        let mut hand: Vec<Card> = (1..=5).map(|n| regular(Color::Yellow, n, 1)).collect();
        hand.push(Card::wild(1));
        hand.push(Card::wild(2));
        let (ok, used) = has_color(&hand, 7);
        assert!(ok);
        assert_eq!(used.len(), 7);
        assert_eq!(used.iter().filter(|c| c.is_wild()).count(), 2);
    }

    #[test]
    fn phase_two_melds_are_disjoint() {
        // A 3-set of 9s and a 4-run 2..5, no overlap.
        let hand = vec![
            regular(Color::Red, 9, 1),
            regular(Color::Blue, 9, 1),
            regular(Color::Green, 9, 1),
            regular(Color::Red, 2, 1),
            regular(Color::Red, 3, 1),
            regular(Color::Red, 4, 1),
            regular(Color::Red, 5, 1),
        ];
        let eval = evaluate_phase(&hand, 2);
        assert!(eval.meld1_complete);
        assert_eq!(eval.meld2_complete, Some(true));
        assert!(eval.complete());
        for used in &eval.meld1_used {
            assert!(
                !eval.meld2_used.iter().any(|c| c.id == used.id),
                "card {} reused across melds",
                used.id
            );
        }
    }

    #[test]
    fn single_meld_phase_reports_no_second_flag() {
        let hand: Vec<Card> = (1..=7).map(|n| regular(Color::Red, n, 1)).collect();
        let eval = evaluate_phase(&hand, 4);
        assert!(eval.meld1_complete);
        assert_eq!(eval.meld2_complete, None);
        assert!(eval.meld2_used.is_empty());
    }

    #[test]
    fn requirement_table_matches_the_rules() {
        use MeldRequirement::*;
        assert_eq!(phase_requirements(1), &[Set(3), Set(3)]);
        assert_eq!(phase_requirements(4), &[Run(7)]);
        assert_eq!(phase_requirements(8), &[Color(7)]);
        assert_eq!(phase_requirements(10), &[Set(5), Set(3)]);
        assert!(phase_requirements(11).is_empty());
    }

    #[test]
    fn phase_prompts_join_requirement_descriptions() {
        assert_eq!(phase_prompt(2), "Set of 3 + Run of 4");
        assert_eq!(phase_prompt(4), "Run of 7");
        assert_eq!(phase_prompt(8), "7 cards of 1 color");
        assert!(phase_prompt(11).is_empty());
    }

    #[test]
    fn meld_satisfies_checks_size_and_shape() {
        let set = vec![
            regular(Color::Red, 7, 1),
            regular(Color::Blue, 7, 1),
            Card::wild(1),
        ];
        assert!(meld_satisfies(&set, MeldRequirement::Set(3)));
        assert!(!meld_satisfies(&set, MeldRequirement::Set(4)));
        assert!(!meld_satisfies(&set, MeldRequirement::Run(3)));

        let run = vec![
            regular(Color::Red, 4, 1),
            Card::wild(1),
            regular(Color::Green, 6, 1),
            regular(Color::Red, 7, 1),
        ];
        assert!(meld_satisfies(&run, MeldRequirement::Run(4)));

        let with_skip = vec![
            regular(Color::Red, 7, 1),
            regular(Color::Blue, 7, 1),
            Card::skip(1),
        ];
        assert!(!meld_satisfies(&with_skip, MeldRequirement::Set(3)));
    }

    #[test]
    fn pile_extension_preserves_classification() {
        let set_pile = vec![regular(Color::Red, 7, 1), regular(Color::Blue, 7, 1)];
        assert!(can_add_to_pile(&set_pile, &[regular(Color::Green, 7, 1)]));
        assert!(can_add_to_pile(&set_pile, &[Card::wild(1)]));
        assert!(!can_add_to_pile(&set_pile, &[regular(Color::Green, 8, 1)]));

        let run_pile = vec![
            regular(Color::Red, 4, 1),
            regular(Color::Red, 5, 1),
            regular(Color::Blue, 6, 1),
        ];
        assert!(can_add_to_pile(&run_pile, &[regular(Color::Green, 7, 1)]));
        assert!(can_add_to_pile(&run_pile, &[regular(Color::Green, 8, 1), Card::wild(1)]));
        assert!(!can_add_to_pile(&run_pile, &[regular(Color::Green, 6, 2)]));

        // Duplicate numbers rule out set and run, leaving the color rule.
        let color_pile = vec![
            regular(Color::Blue, 2, 1),
            regular(Color::Blue, 2, 2),
            regular(Color::Blue, 5, 1),
        ];
        assert!(can_add_to_pile(&color_pile, &[regular(Color::Blue, 9, 1)]));
        assert!(!can_add_to_pile(&color_pile, &[regular(Color::Red, 9, 1)]));

        assert!(!can_add_to_pile(&[], &[regular(Color::Red, 1, 1)]));
        assert!(!can_add_to_pile(&set_pile, &[]));
    }
}
