//! Server engine for a two-player, phase-based rummy card game played over
//! websockets: session handshake, lobby management, dealing, turn
//! validation and meld checking.

pub mod cards;
pub mod config;
pub mod error;
pub mod game;
pub mod gateway;
pub mod lobby;
pub mod phase;
pub mod protocol;
pub mod state;
pub mod store;
pub mod telemetry;
