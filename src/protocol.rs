//! Wire protocol for the websocket gateway.
//!
//! Every frame is a JSON object with a `type` discriminant and camelCase
//! payload fields, e.g. `{"type":"joinLobby","roomCode":"ABCDEF","userId":"…"}`.

use serde::{Deserialize, Serialize};

use crate::cards::Card;
use crate::lobby::{Lobby, User};

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Ping,
    UpdateProfile {
        name: String,
        avatar: String,
    },
    CreateLobby {
        user_id: String,
    },
    JoinLobby {
        room_code: String,
        user_id: String,
    },
    TogglePlayerReady {
        is_ready: bool,
        user_id: String,
        room_code: String,
    },
    LeaveLobby {
        user_id: String,
        room_code: String,
    },
    NewGame {
        room_code: String,
    },
    DrawFromDeck {
        room_code: String,
        user_id: String,
    },
    TakeDiscardCard {
        name: String,
    },
    Discard {
        name: String,
        card: Card,
    },
    PhaseComplete {
        name: String,
        phase_number: u8,
        set1: Vec<Card>,
        set2: Vec<Card>,
    },
    PlayOnPile {
        name: String,
        target_player: String,
        pile_index: usize,
        cards: Vec<Card>,
    },
}

/// Frames the server sends. Card lists are always scoped to the recipient;
/// the opponent's hand is only ever exposed as a length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Pong,
    /// Session token for a first-contact client; resend it on reconnect.
    Token {
        token: String,
    },
    ShowCreateProfile,
    Profile {
        user: User,
    },
    /// Lobby snapshot after create/join/leave; `None` when the lobby is gone.
    Lobby {
        lobby: Option<Lobby>,
    },
    RejoinLobby {
        lobby: Lobby,
    },
    PlayerJoined {
        player: User,
    },
    PlayerReadyUpdate {
        user_id: String,
        is_ready: bool,
    },
    PlayerLeft {
        user_id: String,
    },
    RedirectToGame {
        room_code: String,
    },
    GameStarted {
        hand: Vec<Card>,
        phase: u8,
        /// What the recipient's current phase asks for, e.g. "Set of 3 + Run of 4".
        phase_description: String,
        opponent_name: String,
        opponent_phase: u8,
    },
    Cards {
        hand: Vec<Card>,
        opponent_hand_length: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        drawn_card: Option<Card>,
    },
    Pile {
        own_piles: Vec<Vec<Card>>,
        opponent_piles: Vec<Vec<Card>>,
    },
    DiscardCard {
        card: Option<Card>,
    },
    DiscardTaken {
        card: Card,
    },
    Turn {
        is_turn: bool,
    },
    EndOfRound {
        name: String,
    },
    GameOver {
        name: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::Color;
    use serde_json::{json, Value};

    #[test]
    fn client_frames_deserialize_from_tagged_camel_case() {
        let frame = json!({
            "type": "joinLobby",
            "roomCode": "ABCDEF",
            "userId": "tok-1"
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinLobby { room_code: "ABCDEF".into(), user_id: "tok-1".into() }
        );

        let frame = json!({
            "type": "discard",
            "name": "alice",
            "card": { "id": "red_7_1", "color": "red", "number": 7, "type": "regular" }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::Discard { name, card } => {
                assert_eq!(name, "alice");
                assert_eq!(card.id, "red_7_1");
                assert_eq!(card.color, Some(Color::Red));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn server_frames_carry_the_type_discriminant() {
        let value = serde_json::to_value(ServerEvent::Turn { is_turn: true }).unwrap();
        assert_eq!(value, json!({ "type": "turn", "isTurn": true }));

        let value = serde_json::to_value(ServerEvent::Token { token: "t-1".into() }).unwrap();
        assert_eq!(value, json!({ "type": "token", "token": "t-1" }));
    }

    #[test]
    fn absent_drawn_card_is_omitted_from_the_frame() {
        let event = ServerEvent::Cards {
            hand: vec![Card::wild(1)],
            opponent_hand_length: 9,
            drawn_card: None,
        };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value.get("drawnCard"), None::<&Value>);
        assert_eq!(value["opponentHandLength"], json!(9));
    }
}
