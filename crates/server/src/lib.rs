//! Multi-table Texas Hold'em platform server.
//!
//! Orchestration around the `holdem-engine` state machine: the chip
//! ledger, durable storage, the session bridge, matchmaking, the
//! tournament controller, and crash recovery. Component cycles are broken
//! by injecting collaborators through set-callback seams at wiring time;
//! the binary in `main.rs` is the root that owns everything.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod matchmaking;
pub mod protocol;
pub mod recovery;
pub mod store;
pub mod tournament;

pub use config::Config;
pub use error::AppError;
