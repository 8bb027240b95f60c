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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Coins, Id, bracket::Match, error::CoreError};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum TournamentStatus {
    #[default]
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
    Postponed,
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upcoming => write!(f, "upcoming"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Postponed => write!(f, "postponed"),
        }
    }
}

impl FromStr for TournamentStatus {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "upcoming" => Ok(Self::Upcoming),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "postponed" => Ok(Self::Postponed),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a TournamentStatus!"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Kind {
    #[default]
    Solo,
    Team,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Solo => write!(f, "solo"),
            Self::Team => write!(f, "team"),
        }
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "solo" => Ok(Self::Solo),
            "team" => Ok(Self::Team),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a Kind!"
            ))),
        }
    }
}

/// What happens at the registration deadline when too few entrants
/// confirmed.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ClosePolicy {
    #[default]
    Cancel,
    Postpone,
}

impl fmt::Display for ClosePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => write!(f, "cancel"),
            Self::Postpone => write!(f, "postpone"),
        }
    }
}

impl FromStr for ClosePolicy {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "cancel" => Ok(Self::Cancel),
            "postpone" => Ok(Self::Postpone),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a ClosePolicy!"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Payout {
    pub position: u32,
    pub amount: Coins,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Tournament {
    #[serde(default)]
    pub id: Id,
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub kind: Kind,
    #[serde(default)]
    pub entry_fee: Coins,
    #[serde(default)]
    pub prize_pool: Coins,
    /// Ordered finishing position to prize amount; sums to `prize_pool`.
    #[serde(default)]
    pub payouts: Vec<Payout>,
    /// The platform's cut of `collected`, in basis points.
    #[serde(default)]
    pub platform_fee_bps: u16,
    #[serde(default)]
    pub min_participants: usize,
    #[serde(default)]
    pub max_participants: usize,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub close_policy: ClosePolicy,
    #[serde(default)]
    pub status: TournamentStatus,
    /// Running sum of collected entry fees.
    #[serde(default)]
    pub collected: Coins,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default)]
    pub total_rounds: u32,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub paid_out: bool,
}

impl Tournament {
    /// Checks the host supplied configuration before the tournament is
    /// accepted into the store.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` for non-positive fees or prizes,
    /// `InsufficientParticipants` if fewer than two entrants could ever
    /// start, `PayoutMismatch` if the payout table does not exhaust the
    /// prize pool, skips a position, or declares more positions than
    /// `min_participants` guarantees finishers.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.entry_fee < 0 || self.prize_pool < 0 {
            return Err(CoreError::InvalidAmount);
        }

        if self.min_participants < 2 {
            return Err(CoreError::InsufficientParticipants);
        }

        if self.max_participants < self.min_participants {
            return Err(CoreError::TournamentFull);
        }

        let mut sum = 0;
        for (index, payout) in self.payouts.iter().enumerate() {
            if payout.amount <= 0 {
                return Err(CoreError::InvalidAmount);
            }
            if payout.position as usize != index + 1 {
                return Err(CoreError::PayoutMismatch);
            }
            sum += payout.amount;
        }

        if sum != self.prize_pool || self.payouts.len() > self.min_participants {
            return Err(CoreError::PayoutMismatch);
        }

        Ok(())
    }

    #[must_use]
    pub fn registration_open(&self, now: DateTime<Utc>) -> bool {
        self.status == TournamentStatus::Upcoming && now <= self.deadline
    }

    /// The platform's share of the collected entry fees.
    #[must_use]
    pub fn platform_fee(&self) -> Coins {
        self.collected * Coins::from(self.platform_fee_bps) / 10_000
    }
}

impl fmt::Display for Tournament {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.id, self.name, self.host, self.kind, self.status, self.entry_fee, self.prize_pool
        )
    }
}

/// A finished tournament and its bracket, as appended to the archive file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ArchivedTournament {
    pub tournament: Tournament,
    pub matches: Vec<Match>,
}

impl ArchivedTournament {
    #[must_use]
    pub fn new(tournament: Tournament, matches: Vec<Match>) -> Self {
        Self {
            tournament,
            matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tournament() -> Tournament {
        Tournament {
            name: "spring-cup".to_string(),
            host: "freya".to_string(),
            entry_fee: 100,
            prize_pool: 900,
            payouts: vec![
                Payout {
                    position: 1,
                    amount: 600,
                },
                Payout {
                    position: 2,
                    amount: 300,
                },
            ],
            min_participants: 4,
            max_participants: 16,
            ..Default::default()
        }
    }

    #[test]
    fn payouts_must_exhaust_the_prize_pool() {
        assert_eq!(tournament().validate(), Ok(()));

        let mut short = tournament();
        short.prize_pool = 1_000;
        assert_eq!(short.validate(), Err(CoreError::PayoutMismatch));

        let mut gap = tournament();
        gap.payouts[1].position = 3;
        assert_eq!(gap.validate(), Err(CoreError::PayoutMismatch));

        let mut crowded = tournament();
        crowded.min_participants = 2;
        crowded.max_participants = 2;
        crowded.payouts = vec![
            Payout {
                position: 1,
                amount: 300,
            },
            Payout {
                position: 2,
                amount: 300,
            },
            Payout {
                position: 3,
                amount: 300,
            },
        ];
        assert_eq!(crowded.validate(), Err(CoreError::PayoutMismatch));
    }

    #[test]
    fn the_platform_fee_is_in_basis_points() {
        let mut tournament = tournament();
        tournament.platform_fee_bps = 1_000;
        tournament.collected = 1_250;

        assert_eq!(tournament.platform_fee(), 125);
    }
}
