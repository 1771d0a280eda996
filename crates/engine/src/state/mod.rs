pub mod deck;
pub mod hand;
pub mod hand_eval;
pub mod player;
pub mod pot;

pub use deck::{Card, Deck};
pub use hand::{BettingRound, HandState};
pub use hand_eval::{evaluate_seven, HandRank, HandScore};
pub use player::{ActionKind, Seat, SeatStatus};
pub use pot::{build_pots, uncalled_bet, Pot};
