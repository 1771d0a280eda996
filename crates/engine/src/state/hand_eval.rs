use serde::{Deserialize, Serialize};

use super::deck::Card;

/// Hand category from lowest to highest.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum HandRank {
    HighCard = 0,
    OnePair = 1,
    TwoPair = 2,
    ThreeOfAKind = 3,
    Straight = 4,
    Flush = 5,
    FullHouse = 6,
    FourOfAKind = 7,
    StraightFlush = 8,
    RoyalFlush = 9,
}

impl HandRank {
    pub fn label(self) -> &'static str {
        match self {
            HandRank::HighCard => "High Card",
            HandRank::OnePair => "Pair",
            HandRank::TwoPair => "Two Pair",
            HandRank::ThreeOfAKind => "Three of a Kind",
            HandRank::Straight => "Straight",
            HandRank::Flush => "Flush",
            HandRank::FullHouse => "Full House",
            HandRank::FourOfAKind => "Four of a Kind",
            HandRank::StraightFlush => "Straight Flush",
            HandRank::RoyalFlush => "Royal Flush",
        }
    }
}

/// Evaluated hand: category plus tiebreakers in descending importance.
///
/// Ordering is total: category first, then kickers position by position,
/// so `>` between two scores decides the pot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HandScore {
    pub rank: HandRank,
    pub kickers: [u8; 5],
}

/// Best 5-card hand out of 7, brute-forced over the 21 combinations.
pub fn evaluate_seven(cards: &[Card; 7]) -> HandScore {
    let mut best: Option<HandScore> = None;
    for i in 0..3 {
        for j in (i + 1)..4 {
            for k in (j + 1)..5 {
                for l in (k + 1)..6 {
                    for m in (l + 1)..7 {
                        let score = evaluate_five([
                            cards[i], cards[j], cards[k], cards[l], cards[m],
                        ]);
                        if best.map_or(true, |b| score > b) {
                            best = Some(score);
                        }
                    }
                }
            }
        }
    }
    // 21 combinations always produce at least one score.
    best.unwrap_or(HandScore {
        rank: HandRank::HighCard,
        kickers: [0; 5],
    })
}

fn evaluate_five(cards: [Card; 5]) -> HandScore {
    let mut ranks: [u8; 5] = [
        cards[0].rank(),
        cards[1].rank(),
        cards[2].rank(),
        cards[3].rank(),
        cards[4].rank(),
    ];
    ranks.sort_unstable_by(|a, b| b.cmp(a));

    let is_flush = cards.iter().all(|c| c.suit() == cards[0].suit());
    let straight_high = straight_high(&ranks);

    if is_flush {
        if let Some(high) = straight_high {
            if high == 12 {
                return HandScore {
                    rank: HandRank::RoyalFlush,
                    kickers: [12, 11, 10, 9, 8],
                };
            }
            return HandScore {
                rank: HandRank::StraightFlush,
                kickers: [high, 0, 0, 0, 0],
            };
        }
    }

    // Rank multiplicities, grouped as (count, rank) and ordered so the
    // strongest group comes first.
    let mut counts = [0u8; 13];
    for &r in &ranks {
        counts[r as usize] += 1;
    }
    let mut groups: Vec<(u8, u8)> = counts
        .iter()
        .enumerate()
        .filter(|(_, &n)| n > 0)
        .map(|(r, &n)| (n, r as u8))
        .collect();
    groups.sort_unstable_by(|a, b| b.cmp(a));

    let mut kickers = [0u8; 5];
    match groups[0].0 {
        4 => {
            kickers[0] = groups[0].1;
            kickers[1] = groups[1].1;
            HandScore {
                rank: HandRank::FourOfAKind,
                kickers,
            }
        }
        3 if groups[1].0 == 2 => {
            kickers[0] = groups[0].1;
            kickers[1] = groups[1].1;
            HandScore {
                rank: HandRank::FullHouse,
                kickers,
            }
        }
        _ if is_flush => HandScore {
            rank: HandRank::Flush,
            kickers: ranks,
        },
        _ if straight_high.is_some() => HandScore {
            rank: HandRank::Straight,
            kickers: [straight_high.unwrap_or(0), 0, 0, 0, 0],
        },
        3 => {
            kickers[0] = groups[0].1;
            kickers[1] = groups[1].1;
            kickers[2] = groups[2].1;
            HandScore {
                rank: HandRank::ThreeOfAKind,
                kickers,
            }
        }
        2 if groups[1].0 == 2 => {
            kickers[0] = groups[0].1;
            kickers[1] = groups[1].1;
            kickers[2] = groups[2].1;
            HandScore {
                rank: HandRank::TwoPair,
                kickers,
            }
        }
        2 => {
            kickers[0] = groups[0].1;
            kickers[1] = groups[1].1;
            kickers[2] = groups[2].1;
            kickers[3] = groups[3].1;
            HandScore {
                rank: HandRank::OnePair,
                kickers,
            }
        }
        _ => HandScore {
            rank: HandRank::HighCard,
            kickers: ranks,
        },
    }
}

/// High card of a straight if the five descending ranks form one.
/// The wheel (A-5-4-3-2) counts with high card Five.
fn straight_high(ranks_desc: &[u8; 5]) -> Option<u8> {
    if ranks_desc == &[12, 3, 2, 1, 0] {
        return Some(3);
    }
    for w in ranks_desc.windows(2) {
        if w[0] != w[1] + 1 {
            return None;
        }
    }
    Some(ranks_desc[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards(notation: &str) -> Vec<Card> {
        notation.split_whitespace()
            .map(|s| s.parse().unwrap())
            .collect()
    }

    fn seven(notation: &str) -> [Card; 7] {
        let v = cards(notation);
        [v[0], v[1], v[2], v[3], v[4], v[5], v[6]]
    }

    #[test]
    fn detects_royal_flush() {
        let score = evaluate_seven(&seven("Ah Kh Qh Jh Th 2c 3d"));
        assert_eq!(score.rank, HandRank::RoyalFlush);
    }

    #[test]
    fn wheel_straight_flush_is_five_high() {
        let score = evaluate_seven(&seven("Ah 2h 3h 4h 5h Kc Qd"));
        assert_eq!(score.rank, HandRank::StraightFlush);
        assert_eq!(score.kickers[0], 3); // rank of Five

        let six_high = evaluate_seven(&seven("2s 3s 4s 5s 6s Kc Qd"));
        assert!(six_high > score);
    }

    #[test]
    fn full_house_beats_flush() {
        let full = evaluate_seven(&seven("Ah Ad Ac Kh Kd 2c 3c"));
        let flush = evaluate_seven(&seven("Ah Kh 9h 5h 2h 3c 4c"));
        assert_eq!(full.rank, HandRank::FullHouse);
        assert_eq!(flush.rank, HandRank::Flush);
        assert!(full > flush);
    }

    #[test]
    fn kicker_decides_equal_pairs() {
        let ace_kicker = evaluate_seven(&seven("Qh Qd Ah 9c 5d 3s 2c"));
        let king_kicker = evaluate_seven(&seven("Qs Qc Kh 9d 5c 3h 2d"));
        assert_eq!(ace_kicker.rank, HandRank::OnePair);
        assert!(ace_kicker > king_kicker);
    }

    #[test]
    fn board_plays_for_identical_scores() {
        // Both players' hole cards are dead; the board is a broadway straight.
        let a = evaluate_seven(&seven("Ah Kd Qc Js Td 2h 3c"));
        let b = evaluate_seven(&seven("Ah Kd Qc Js Td 2d 3h"));
        assert_eq!(a, b);
        assert_eq!(a.rank, HandRank::Straight);
    }

    #[test]
    fn best_five_of_seven_selected() {
        // Two pair on the board plus a higher pair in hand makes a full house.
        let score = evaluate_seven(&seven("9h 9d 4c 4d Kh Ks Kc"));
        assert_eq!(score.rank, HandRank::FullHouse);
        assert_eq!(score.kickers[0], 11); // kings full
        assert_eq!(score.kickers[1], 7); // of nines
    }
}
