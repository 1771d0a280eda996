use holdem_engine::EngineError;
use thiserror::Error;

use crate::store::StoreError;

/// Application error taxonomy.
///
/// Engine-level failures go back to the acting client as an `error` frame
/// and never disturb other clients. Store failures inside a transaction
/// roll the whole enclosing operation back.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("not your turn")]
    OutOfTurn,

    #[error("illegal action: {0}")]
    IllegalAction(String),

    #[error("action deadline passed")]
    TimedOut,

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Message shown to the client in an `error` frame.
    pub fn client_message(&self) -> String {
        self.to_string()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::OutOfTurn => AppError::OutOfTurn,
            EngineError::StaleTimeout => AppError::TimedOut,
            EngineError::TablePaused => AppError::Unavailable("table is paused".into()),
            EngineError::GameOver => AppError::Unavailable("table is completed".into()),
            EngineError::TableFull
            | EngineError::SeatOccupied
            | EngineError::AlreadySeated => AppError::Conflict(err.to_string()),
            EngineError::PlayerNotAtTable => AppError::NotFound("seat"),
            EngineError::InvalidSeatIndex | EngineError::InvalidBuyIn => {
                AppError::InvalidInput(err.to_string())
            }
            EngineError::CannotCheck
            | EngineError::NothingToCall
            | EngineError::RaiseTooSmall
            | EngineError::PlayerCannotAct
            | EngineError::NotEnoughPlayers
            | EngineError::HandInProgress
            | EngineError::NoHandInProgress => AppError::IllegalAction(err.to_string()),
            EngineError::DeckExhausted => AppError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}
