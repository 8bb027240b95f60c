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

use thiserror::Error;

use crate::Id;

/// Every failure the core can produce. An error aborts the enclosing store
/// transaction, so no partial ledger or bracket state survives it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("ledger: the amount must be greater than zero")]
    InvalidAmount,
    #[error("ledger: no wallet exists for {0}")]
    WalletNotFound(String),
    #[error("ledger: the balance is too low")]
    InsufficientBalance,
    #[error("ledger: the available balance is too low")]
    InsufficientAvailableBalance,
    #[error("ledger: no transaction exists with id {0}")]
    TransactionNotFound(Id),
    #[error("bracket: at least two confirmed participants are required")]
    InsufficientParticipants,
    #[error("bracket: the bracket has already been started")]
    BracketAlreadyStarted,
    #[error("match: draws must be decided before submitting a score")]
    DrawNotAllowed,
    #[error("match: the match is already completed")]
    MatchAlreadyCompleted,
    #[error("match: the match is locked")]
    MatchLocked,
    #[error("match: no match exists with id {0}")]
    MatchNotFound(Id),
    #[error("match: both participant slots must be filled")]
    MatchNotReady,
    #[error("match: {0} is not a participant of this match")]
    NotAParticipant(String),
    #[error("you are not allowed to do that")]
    Unauthorized,
    #[error("tournament: no tournament exists with id {0}")]
    TournamentNotFound(Id),
    #[error("tournament: registration is closed")]
    RegistrationClosed,
    #[error("tournament: all slots are taken")]
    TournamentFull,
    #[error("tournament: already registered")]
    AlreadyRegistered,
    #[error("tournament: not registered")]
    NotRegistered,
    #[error("tournament: the payout table must exhaust the prize pool")]
    PayoutMismatch,
    #[error("tournament: the operation is not allowed in the current status")]
    WrongTournamentStatus,
}
