// This file is part of esports-arena.
//
// esports-arena is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// esports-arena is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    Id,
    counter::{Category, Counters},
    error::CoreError,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchStatus {
    #[default]
    Scheduled,
    Completed,
    Disputed,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Completed => write!(f, "completed"),
            Self::Disputed => write!(f, "disputed"),
        }
    }
}

impl FromStr for MatchStatus {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "disputed" => Ok(Self::Disputed),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a MatchStatus!"
            ))),
        }
    }
}

/// Which participant slot of the next match a winner advances into.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Slot {
    First,
    Second,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "1"),
            Self::Second => write!(f, "2"),
        }
    }
}

impl FromStr for Slot {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "1" => Ok(Self::First),
            "2" => Ok(Self::Second),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a Slot!"
            ))),
        }
    }
}

/// One node of the single elimination tree. The `next_match` edges point
/// from each non-final match toward the final, which has none.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Match {
    #[serde(default)]
    pub id: Id,
    #[serde(default)]
    pub tournament: Id,
    #[serde(default)]
    pub round: u32,
    /// 1-indexed within the round.
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub participant_a: Option<String>,
    #[serde(default)]
    pub participant_b: Option<String>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub score_a: Option<u32>,
    #[serde(default)]
    pub score_b: Option<u32>,
    #[serde(default)]
    pub status: MatchStatus,
    #[serde(default)]
    pub is_bye: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub next_match: Option<Id>,
    #[serde(default)]
    pub slot_in_next: Option<Slot>,
}

impl Match {
    #[must_use]
    pub fn has_participant(&self, name: &str) -> bool {
        self.participant_a.as_deref() == Some(name) || self.participant_b.as_deref() == Some(name)
    }

    #[must_use]
    pub fn ready(&self) -> bool {
        self.participant_a.is_some() && self.participant_b.is_some()
    }

    /// The completed match's non-winner. Byes have no loser.
    #[must_use]
    pub fn loser(&self) -> Option<&str> {
        if self.status != MatchStatus::Completed || self.is_bye {
            return None;
        }

        let winner = self.winner.as_deref()?;
        match (self.participant_a.as_deref(), self.participant_b.as_deref()) {
            (Some(a), _) if a != winner => Some(a),
            (_, Some(b)) if b != winner => Some(b),
            _ => None,
        }
    }

    pub fn fill_slot(&mut self, slot: Slot, name: String) {
        match slot {
            Slot::First => self.participant_a = Some(name),
            Slot::Second => self.participant_b = Some(name),
        }
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.participant_a.as_deref().unwrap_or("_");
        let b = self.participant_b.as_deref().unwrap_or("_");

        write!(
            f,
            "{} {}.{} {a} {b} {}",
            self.id, self.round, self.number, self.status
        )
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Bracket {
    pub total_rounds: u32,
    pub matches: Vec<Match>,
}

/// Index of match (round, number) in construction order: rounds ascending,
/// numbers ascending within a round.
fn slot_index(bracket_size: usize, round: u32, number: u32) -> usize {
    let before = bracket_size - (bracket_size >> (round - 1));
    before + number as usize - 1
}

/// Builds the whole single elimination tree for the given entrants.
///
/// With `n` entrants: `bracket_size` is the next power of two, giving
/// `bracket_size - 1` matches over `ceil(log2(n))` rounds and
/// `bracket_size - n` byes. Round one is seeded first slots then second
/// slots, so every match holds at least one entrant and every bye faces a
/// real opponent, who completes the match immediately and advances.
///
/// # Errors
///
/// `InsufficientParticipants` if fewer than two entrants are given.
#[allow(clippy::cast_possible_truncation, clippy::missing_panics_doc)]
pub fn build(
    tournament: Id,
    entrants: &[String],
    counters: &mut Counters,
) -> Result<Bracket, CoreError> {
    let n = entrants.len();
    if n < 2 {
        return Err(CoreError::InsufficientParticipants);
    }

    let mut total_rounds: u32 = 0;
    let mut bracket_size: usize = 1;
    while bracket_size < n {
        bracket_size *= 2;
        total_rounds += 1;
    }

    let mut matches = Vec::with_capacity(bracket_size - 1);
    for round in 1..=total_rounds {
        let count = bracket_size >> round;
        for number in 1..=count {
            matches.push(Match {
                id: counters.next(Category::Match),
                tournament,
                round,
                number: number as u32,
                ..Match::default()
            });
        }
    }

    // wire every non-final match to (round + 1, ceil(number / 2))
    for index in 0..matches.len() {
        let (round, number) = (matches[index].round, matches[index].number);
        if round == total_rounds {
            continue;
        }

        let next_index = slot_index(bracket_size, round + 1, number.div_ceil(2));
        let next_id = matches[next_index].id;

        let game = &mut matches[index];
        game.next_match = Some(next_id);
        game.slot_in_next = Some(if number % 2 == 1 {
            Slot::First
        } else {
            Slot::Second
        });
    }

    // seed round one, first slots then second slots
    let first_round = bracket_size / 2;
    for (i, name) in entrants.iter().enumerate() {
        let game = &mut matches[i % first_round];
        if i < first_round {
            game.participant_a = Some(name.clone());
        } else {
            game.participant_b = Some(name.clone());
        }
    }

    // byes complete immediately and propagate synchronously
    for index in 0..first_round {
        let game = &mut matches[index];

        let winner = match (&game.participant_a, &game.participant_b) {
            (Some(name), None) | (None, Some(name)) => name.clone(),
            _ => continue,
        };

        game.is_bye = true;
        game.status = MatchStatus::Completed;
        game.winner = Some(winner.clone());

        let slot = game.slot_in_next;
        let number = game.number;
        if total_rounds > 1
            && let Some(slot) = slot
        {
            let next_index = slot_index(bracket_size, 2, number.div_ceil(2));
            matches[next_index].fill_slot(slot, winner);
        }
    }

    Ok(Bracket {
        total_rounds,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entrants(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("player-{i}")).collect()
    }

    #[test]
    fn too_few_entrants_fail() {
        let mut counters = Counters::default();

        assert_eq!(
            build(1, &entrants(0), &mut counters),
            Err(CoreError::InsufficientParticipants)
        );
        assert_eq!(
            build(1, &entrants(1), &mut counters),
            Err(CoreError::InsufficientParticipants)
        );
    }

    #[test]
    fn the_tree_has_one_root_and_forward_edges() {
        for n in 2..=17 {
            let mut counters = Counters::default();
            let bracket = build(1, &entrants(n), &mut counters).unwrap();

            let bracket_size = usize::pow(2, bracket.total_rounds);
            assert!(bracket_size >= n && bracket_size < 2 * n);
            assert_eq!(bracket.matches.len(), bracket_size - 1);

            let byes = bracket.matches.iter().filter(|game| game.is_bye).count();
            assert_eq!(byes, bracket_size - n);

            let roots = bracket
                .matches
                .iter()
                .filter(|game| game.next_match.is_none())
                .count();
            assert_eq!(roots, 1);

            for game in &bracket.matches {
                if let Some(next_id) = game.next_match {
                    let next = bracket
                        .matches
                        .iter()
                        .find(|other| other.id == next_id)
                        .unwrap();
                    assert_eq!(next.round, game.round + 1);
                } else {
                    assert_eq!(game.round, bracket.total_rounds);
                    assert_eq!(game.number, 1);
                }
            }
        }
    }

    #[test]
    fn five_entrants_get_three_byes_propagated() {
        let mut counters = Counters::default();
        let bracket = build(1, &entrants(5), &mut counters).unwrap();

        assert_eq!(bracket.total_rounds, 3);
        assert_eq!(bracket.matches.len(), 7);

        let byes: Vec<_> = bracket
            .matches
            .iter()
            .filter(|game| game.is_bye)
            .collect();
        assert_eq!(byes.len(), 3);

        // every bye is already won by its only entrant, no human involved
        for game in &byes {
            assert_eq!(game.status, MatchStatus::Completed);
            assert!(game.winner.is_some());
            assert_eq!(game.loser(), None);
        }

        // their winners already sit in round two
        let round_two: Vec<_> = bracket
            .matches
            .iter()
            .filter(|game| game.round == 2)
            .collect();
        let filled = round_two
            .iter()
            .map(|game| {
                usize::from(game.participant_a.is_some())
                    + usize::from(game.participant_b.is_some())
            })
            .sum::<usize>();
        assert_eq!(filled, 3);

        // the only real round-one match still waits for scores
        let real: Vec<_> = bracket
            .matches
            .iter()
            .filter(|game| game.round == 1 && !game.is_bye)
            .collect();
        assert_eq!(real.len(), 1);
        assert_eq!(real[0].status, MatchStatus::Scheduled);
        assert!(real[0].ready());
    }

    #[test]
    fn slots_alternate_by_match_number() {
        let mut counters = Counters::default();
        let bracket = build(1, &entrants(8), &mut counters).unwrap();

        for game in &bracket.matches {
            match (game.number % 2, game.slot_in_next) {
                (1, Some(slot)) => assert_eq!(slot, Slot::First),
                (0, Some(slot)) => assert_eq!(slot, Slot::Second),
                (_, None) => assert_eq!(game.round, bracket.total_rounds),
                _ => unreachable!(),
            }
        }
    }
}
