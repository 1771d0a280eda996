/// Cards in a standard deck.
pub const DECK_SIZE: usize = 52;

/// Hard cap on seats at one table.
pub const MAX_SEATS: usize = 9;

/// Minimum seated, chip-holding players required to start a hand.
pub const MIN_PLAYERS: usize = 2;

/// Community cards dealt over flop, turn and river.
pub const BOARD_SIZE: usize = 5;

/// Default decision time per action when a table does not configure one.
pub const DEFAULT_ACTION_TIMEOUT_SECONDS: i64 = 30;
