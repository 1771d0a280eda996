use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::DECK_SIZE;

const RANK_CHARS: [char; 13] = [
    '2', '3', '4', '5', '6', '7', '8', '9', 'T', 'J', 'Q', 'K', 'A',
];
const SUIT_CHARS: [char; 4] = ['h', 'd', 'c', 's'];

/// A playing card encoded as 0..52.
///
/// Suit = value / 13 (0=hearts, 1=diamonds, 2=clubs, 3=spades),
/// rank = value % 13 (0=Two .. 12=Ace). Serialized as the two-character
/// form used on the wire and in hand records, e.g. `"Ah"`, `"Td"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Card(u8);

impl Card {
    pub fn new(value: u8) -> Option<Self> {
        (value < DECK_SIZE as u8).then_some(Card(value))
    }

    /// Rank 0..13 where 0 = Two and 12 = Ace.
    #[inline]
    pub fn rank(self) -> u8 {
        self.0 % 13
    }

    /// Suit 0..4.
    #[inline]
    pub fn suit(self) -> u8 {
        self.0 / 13
    }

    #[inline]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            RANK_CHARS[self.rank() as usize],
            SUIT_CHARS[self.suit() as usize]
        )
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Card {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(r), Some(u), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(format!("invalid card {s:?}"));
        };
        let rank = RANK_CHARS
            .iter()
            .position(|&c| c == r.to_ascii_uppercase())
            .ok_or_else(|| format!("invalid rank in {s:?}"))?;
        let suit = SUIT_CHARS
            .iter()
            .position(|&c| c == u.to_ascii_lowercase())
            .ok_or_else(|| format!("invalid suit in {s:?}"))?;
        Ok(Card((suit * 13 + rank) as u8))
    }
}

impl Serialize for Card {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Card {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A shuffled 52-card deck for one hand.
#[derive(Clone, Debug)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    /// Fresh deck shuffled with the caller's RNG so tests can seed it.
    pub fn shuffled<R: Rng>(rng: &mut R) -> Self {
        let mut cards: Vec<Card> = (0..DECK_SIZE as u8).map(Card).collect();
        cards.shuffle(rng);
        Deck { cards }
    }

    /// Deal the next card.
    pub fn deal(&mut self) -> Option<Card> {
        self.cards.pop()
    }

    pub fn remaining(&self) -> usize {
        self.cards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn card_display_round_trips() {
        for v in 0..DECK_SIZE as u8 {
            let card = Card(v);
            let parsed: Card = card.to_string().parse().unwrap();
            assert_eq!(card, parsed);
        }
    }

    #[test]
    fn card_encoding_matches_suit_and_rank() {
        let ace_hearts: Card = "Ah".parse().unwrap();
        assert_eq!(ace_hearts.suit(), 0);
        assert_eq!(ace_hearts.rank(), 12);

        let two_spades: Card = "2s".parse().unwrap();
        assert_eq!(two_spades.suit(), 3);
        assert_eq!(two_spades.rank(), 0);
    }

    #[test]
    fn card_serde_uses_string_form() {
        let card: Card = "Kd".parse().unwrap();
        assert_eq!(serde_json::to_string(&card).unwrap(), "\"Kd\"");
        let back: Card = serde_json::from_str("\"kD\"").unwrap();
        assert_eq!(back, card);
    }

    #[test]
    fn shuffled_deck_deals_all_distinct_cards() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut deck = Deck::shuffled(&mut rng);
        let mut seen = std::collections::HashSet::new();
        while let Some(card) = deck.deal() {
            assert!(seen.insert(card.value()));
        }
        assert_eq!(seen.len(), DECK_SIZE);
    }

    #[test]
    fn same_seed_same_order() {
        let mut a = Deck::shuffled(&mut StdRng::seed_from_u64(42));
        let mut b = Deck::shuffled(&mut StdRng::seed_from_u64(42));
        for _ in 0..DECK_SIZE {
            assert_eq!(a.deal(), b.deal());
        }
    }
}
