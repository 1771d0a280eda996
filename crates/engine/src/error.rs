use thiserror::Error;

/// Errors surfaced by table operations.
///
/// These stay table-local: an invalid action is reported to the acting
/// player and never disturbs the rest of the table.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("table is full")]
    TableFull,

    #[error("seat is already occupied")]
    SeatOccupied,

    #[error("invalid seat index")]
    InvalidSeatIndex,

    #[error("player is already seated at this table")]
    AlreadySeated,

    #[error("player is not at this table")]
    PlayerNotAtTable,

    #[error("buy-in amount out of range")]
    InvalidBuyIn,

    #[error("not enough players to start")]
    NotEnoughPlayers,

    #[error("hand is already in progress")]
    HandInProgress,

    #[error("no hand in progress")]
    NoHandInProgress,

    #[error("not player's turn")]
    OutOfTurn,

    #[error("cannot check, there is a bet to match")]
    CannotCheck,

    #[error("nothing to call")]
    NothingToCall,

    #[error("raise amount too small")]
    RaiseTooSmall,

    #[error("player cannot act in this hand")]
    PlayerCannotAct,

    #[error("table is paused")]
    TablePaused,

    #[error("table is completed")]
    GameOver,

    #[error("timeout no longer matches the pending action")]
    StaleTimeout,

    #[error("deck exhausted")]
    DeckExhausted,
}
