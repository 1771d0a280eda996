//! Texas Hold'em table engine.
//!
//! A deterministic, synchronous hand state machine: seats, blinds, betting
//! rounds, side pots, and showdown resolution for a single table. All I/O,
//! persistence, and timer scheduling live in the server crate; the engine
//! surfaces events through a caller-provided sink and exposes deep-copied
//! snapshots for reads.

pub mod constants;
pub mod error;
pub mod events;
pub mod state;
pub mod table;

pub use error::EngineError;
pub use events::{EngineEvent, GameEvent, Winner};
pub use state::deck::{Card, Deck};
pub use state::hand::BettingRound;
pub use state::hand_eval::HandRank;
pub use state::player::{ActionKind, SeatStatus};
pub use table::{
    EventSink, GameKind, HandSnapshot, PotSnapshot, RemoveOutcome, SeatSnapshot, Table,
    TableConfig, TableSnapshot, TableStatus,
};
