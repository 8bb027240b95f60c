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

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use log::error;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{
    Coins, Id, bracket,
    bracket::{Match, MatchStatus},
    capability::{Capabilities, Capability},
    counter::{Category, Counters},
    error::CoreError,
    event::{Event, Messenger},
    ledger::{Direction, Ledger, Source},
    registration::{PaymentStatus, Registration, RegistrationStatus},
    tournament::{ClosePolicy, Tournament, TournamentStatus},
};

/// What the registration deadline decided for a tournament short of
/// entrants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseOutcome {
    Ready,
    Cancelled,
    Postponed,
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Postponed => write!(f, "postponed"),
        }
    }
}

/// All tournament platform state and the orchestrator over it. Every
/// multi-step mutation runs through [`Store::transaction`], so a failing
/// operation leaves nothing behind.
///
/// Matches are runtime state, persisted separately by the server, so they
/// are skipped when the store is serialized.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Store {
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub tournaments: HashMap<Id, Tournament>,
    #[serde(default)]
    pub registrations: HashMap<Id, Vec<Registration>>,
    #[serde(skip)]
    pub matches: HashMap<Id, Match>,
    #[serde(skip)]
    pub events: Messenger,
}

impl Store {
    /// The transaction primitive every multi-step mutation runs in: the
    /// operation works on a staged copy which replaces the store only when
    /// it succeeds. An error observes none of its own writes afterwards.
    ///
    /// # Errors
    ///
    /// Whatever `run` returns.
    pub fn transaction<T>(
        &mut self,
        run: impl FnOnce(&mut Self) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut staged = self.clone();
        let value = run(&mut staged)?;
        *self = staged;
        Ok(value)
    }

    pub fn open_wallet(&mut self, username: &str) {
        self.ledger.open_wallet(username);
    }

    /// # Errors
    ///
    /// See [`Ledger::credit`].
    pub fn deposit(&mut self, username: &str, amount: Coins) -> Result<Id, CoreError> {
        self.transaction(|store| {
            store
                .ledger
                .credit(&mut store.counters, username, amount, Source::Deposit, None)
        })
    }

    /// An operator adjustment outside any tournament flow.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without the ledger capability, otherwise see
    /// [`Ledger::credit`] and [`Ledger::debit`].
    pub fn manual_adjust(
        &mut self,
        caps: &Capabilities,
        username: &str,
        direction: Direction,
        amount: Coins,
    ) -> Result<Id, CoreError> {
        if !caps.contains(&Capability::ManageLedger) {
            return Err(CoreError::Unauthorized);
        }

        self.transaction(|store| match direction {
            Direction::Credit => {
                store
                    .ledger
                    .credit(&mut store.counters, username, amount, Source::Manual, None)
            }
            Direction::Debit => {
                store
                    .ledger
                    .debit(&mut store.counters, username, amount, Source::Manual, None)
            }
        })
    }

    /// # Errors
    ///
    /// See [`Ledger::request_withdrawal`].
    pub fn request_withdrawal(&mut self, username: &str, amount: Coins) -> Result<Id, CoreError> {
        self.transaction(|store| {
            store
                .ledger
                .request_withdrawal(&mut store.counters, username, amount)
        })
    }

    /// # Errors
    ///
    /// `Unauthorized` without the approval capability, otherwise see
    /// [`Ledger::approve_withdrawal`].
    pub fn approve_withdrawal(
        &mut self,
        caps: &Capabilities,
        username: &str,
        id: Id,
    ) -> Result<(), CoreError> {
        if !caps.contains(&Capability::ApproveWithdrawals) {
            return Err(CoreError::Unauthorized);
        }

        self.transaction(|store| store.ledger.approve_withdrawal(username, id))
    }

    /// # Errors
    ///
    /// `Unauthorized` without the hosting capability, or the draft's own
    /// validation failure.
    pub fn create_tournament(
        &mut self,
        caps: &Capabilities,
        mut tournament: Tournament,
    ) -> Result<Id, CoreError> {
        if !caps.contains(&Capability::HostTournaments) {
            return Err(CoreError::Unauthorized);
        }

        tournament.validate()?;

        self.transaction(move |store| {
            let id = store.counters.next(Category::Tournament);
            tournament.id = id;
            tournament.status = TournamentStatus::Upcoming;
            tournament.collected = 0;
            tournament.current_round = 0;
            tournament.total_rounds = 0;
            tournament.winner = None;
            tournament.paid_out = false;

            store.tournaments.insert(id, tournament);
            store.registrations.insert(id, Vec::new());

            Ok(id)
        })
    }

    /// # Errors
    ///
    /// `TournamentNotFound`.
    pub fn tournament(&self, id: Id) -> Result<&Tournament, CoreError> {
        self.tournaments
            .get(&id)
            .ok_or(CoreError::TournamentNotFound(id))
    }

    fn tournament_mut(&mut self, id: Id) -> Result<&mut Tournament, CoreError> {
        self.tournaments
            .get_mut(&id)
            .ok_or(CoreError::TournamentNotFound(id))
    }

    #[must_use]
    pub fn tournaments_by_id(&self) -> Vec<&Tournament> {
        let mut tournaments: Vec<_> = self.tournaments.values().collect();
        tournaments.sort_unstable_by_key(|tournament| tournament.id);
        tournaments
    }

    /// # Errors
    ///
    /// `MatchNotFound`.
    pub fn game(&self, id: Id) -> Result<&Match, CoreError> {
        self.matches.get(&id).ok_or(CoreError::MatchNotFound(id))
    }

    #[must_use]
    pub fn matches_for(&self, tournament: Id) -> Vec<&Match> {
        let mut games: Vec<_> = self
            .matches
            .values()
            .filter(|game| game.tournament == tournament)
            .collect();
        games.sort_unstable_by_key(|game| (game.round, game.number));
        games
    }

    #[must_use]
    pub fn confirmed_entrants(&self, id: Id) -> Vec<String> {
        self.registrations.get(&id).map_or_else(Vec::new, |regs| {
            regs.iter()
                .filter(|registration| registration.status == RegistrationStatus::Confirmed)
                .map(|registration| registration.entrant.clone())
                .collect()
        })
    }

    fn entrant_owner(&self, tournament: Id, entrant: &str) -> Option<String> {
        self.registrations
            .get(&tournament)?
            .iter()
            .find(|registration| registration.entrant == entrant)
            .map(|registration| registration.username.clone())
    }

    fn authorize_manage(
        &self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
    ) -> Result<(), CoreError> {
        if caps.contains(&Capability::ManageAnyTournament) {
            return Ok(());
        }

        let tournament = self.tournament(id)?;
        if caps.contains(&Capability::HostTournaments) && tournament.host == actor {
            return Ok(());
        }

        Err(CoreError::Unauthorized)
    }

    /// Registers `username` (or their team) and collects the entry fee, all
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// `RegistrationClosed` past the deadline or outside UPCOMING,
    /// `TournamentFull`, `AlreadyRegistered`, or the fee debit's failure.
    pub fn register(
        &mut self,
        caps: &Capabilities,
        username: &str,
        id: Id,
        entrant: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if !caps.contains(&Capability::JoinTournaments) {
            return Err(CoreError::Unauthorized);
        }

        self.transaction(|store| {
            let tournament = store.tournament(id)?;
            if !tournament.registration_open(now) {
                return Err(CoreError::RegistrationClosed);
            }

            let fee = tournament.entry_fee;
            let kind = tournament.kind;
            let max = tournament.max_participants;

            let entrant = match kind {
                crate::tournament::Kind::Solo => username.to_string(),
                crate::tournament::Kind::Team => entrant.unwrap_or(username).to_string(),
            };

            if let Some(registrations) = store.registrations.get(&id) {
                if registrations.len() >= max {
                    return Err(CoreError::TournamentFull);
                }
                if registrations.iter().any(|registration| {
                    registration.username == username || registration.entrant == entrant
                }) {
                    return Err(CoreError::AlreadyRegistered);
                }
            }

            if fee > 0 {
                store
                    .ledger
                    .debit(&mut store.counters, username, fee, Source::EntryFee, Some(id))?;
            }

            store
                .registrations
                .entry(id)
                .or_default()
                .push(Registration {
                    tournament: id,
                    username: username.to_string(),
                    entrant,
                    status: RegistrationStatus::Confirmed,
                    payment: PaymentStatus::Paid,
                    registered_at: now.timestamp(),
                });

            store.tournament_mut(id)?.collected += fee;
            Ok(())
        })
    }

    /// The reverse of [`Store::register`]: refunds the fee and removes the
    /// registration.
    ///
    /// # Errors
    ///
    /// `RegistrationClosed` once the tournament left UPCOMING,
    /// `NotRegistered` otherwise.
    pub fn unregister(&mut self, username: &str, id: Id) -> Result<(), CoreError> {
        self.transaction(|store| {
            let tournament = store.tournament(id)?;
            if tournament.status != TournamentStatus::Upcoming {
                return Err(CoreError::RegistrationClosed);
            }
            let fee = tournament.entry_fee;

            let registrations = store
                .registrations
                .get_mut(&id)
                .ok_or(CoreError::TournamentNotFound(id))?;
            let index = registrations
                .iter()
                .position(|registration| registration.username == username)
                .ok_or(CoreError::NotRegistered)?;
            registrations.remove(index);

            if fee > 0 {
                store
                    .ledger
                    .credit(&mut store.counters, username, fee, Source::Refund, Some(id))?;
            }

            store.tournament_mut(id)?.collected -= fee;
            Ok(())
        })
    }

    /// Applied at the registration deadline. Enough entrants means the
    /// bracket may start; too few falls back to the tournament's close
    /// policy: cancel (refund everyone) or postpone.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, or `WrongTournamentStatus` outside UPCOMING.
    pub fn close_registration(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
    ) -> Result<CloseOutcome, CoreError> {
        self.authorize_manage(actor, caps, id)?;

        self.transaction(|store| {
            let tournament = store.tournament(id)?;
            if tournament.status != TournamentStatus::Upcoming {
                return Err(CoreError::WrongTournamentStatus);
            }
            let min = tournament.min_participants;
            let policy = tournament.close_policy;

            if store.confirmed_entrants(id).len() >= min {
                return Ok(CloseOutcome::Ready);
            }

            match policy {
                ClosePolicy::Cancel => {
                    store.refund_all(id)?;
                    store.tournament_mut(id)?.status = TournamentStatus::Cancelled;
                    Ok(CloseOutcome::Cancelled)
                }
                ClosePolicy::Postpone => {
                    store.tournament_mut(id)?.status = TournamentStatus::Postponed;
                    Ok(CloseOutcome::Postponed)
                }
            }
        })
    }

    /// # Errors
    ///
    /// `Unauthorized`, or `WrongTournamentStatus` once the bracket runs.
    pub fn cancel_tournament(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
    ) -> Result<(), CoreError> {
        self.authorize_manage(actor, caps, id)?;

        self.transaction(|store| {
            let status = store.tournament(id)?.status;
            if status != TournamentStatus::Upcoming && status != TournamentStatus::Postponed {
                return Err(CoreError::WrongTournamentStatus);
            }

            store.refund_all(id)?;
            store.tournament_mut(id)?.status = TournamentStatus::Cancelled;
            Ok(())
        })
    }

    /// Reopens a postponed (or still upcoming) tournament with a new
    /// registration deadline.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, or `WrongTournamentStatus` once the bracket runs.
    pub fn reschedule(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
        deadline: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.authorize_manage(actor, caps, id)?;

        self.transaction(|store| {
            let tournament = store.tournament_mut(id)?;
            if tournament.status != TournamentStatus::Upcoming
                && tournament.status != TournamentStatus::Postponed
            {
                return Err(CoreError::WrongTournamentStatus);
            }

            tournament.deadline = deadline;
            tournament.status = TournamentStatus::Upcoming;
            Ok(())
        })
    }

    fn refund_all(&mut self, id: Id) -> Result<(), CoreError> {
        let fee = self.tournament(id)?.entry_fee;

        let registrations = self.registrations.get(&id).cloned().unwrap_or_default();
        let mut refunded = 0;
        for registration in &registrations {
            if registration.payment == PaymentStatus::Paid && fee > 0 {
                self.ledger.credit(
                    &mut self.counters,
                    &registration.username,
                    fee,
                    Source::Refund,
                    Some(id),
                )?;
                refunded += fee;
            }
        }

        if let Some(registrations) = self.registrations.get_mut(&id) {
            for registration in registrations {
                registration.payment = PaymentStatus::Refunded;
            }
        }

        self.tournament_mut(id)?.collected -= refunded;
        Ok(())
    }

    /// Shuffles the confirmed entrants and builds the bracket.
    ///
    /// # Errors
    ///
    /// See [`Store::start_bracket_seeded`].
    pub fn start_bracket(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
    ) -> Result<(), CoreError> {
        let mut entrants = self.confirmed_entrants(id);
        entrants.shuffle(&mut rand::rng());
        self.start_bracket_seeded(actor, caps, id, entrants)
    }

    /// Builds the bracket in the given seeding order: all matches, their
    /// wiring and the initial bye propagation land in one transaction, so a
    /// partial bracket is never observable. Runs once per tournament, only
    /// from UPCOMING.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `BracketAlreadyStarted` once ONGOING or COMPLETED,
    /// `WrongTournamentStatus` when cancelled or postponed, and
    /// `InsufficientParticipants` below the tournament's minimum.
    pub fn start_bracket_seeded(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
        entrants: Vec<String>,
    ) -> Result<(), CoreError> {
        self.authorize_manage(actor, caps, id)?;

        let events = self.transaction(move |store| {
            let tournament = store.tournament(id)?;
            match tournament.status {
                TournamentStatus::Upcoming => {}
                TournamentStatus::Ongoing | TournamentStatus::Completed => {
                    return Err(CoreError::BracketAlreadyStarted);
                }
                TournamentStatus::Cancelled | TournamentStatus::Postponed => {
                    return Err(CoreError::WrongTournamentStatus);
                }
            }

            if entrants.len() < tournament.min_participants {
                return Err(CoreError::InsufficientParticipants);
            }

            let bracket = bracket::build(id, &entrants, &mut store.counters)?;

            let mut events = Vec::new();
            for game in bracket.matches {
                if game.is_bye
                    && let Some(winner) = &game.winner
                {
                    events.push(Event::MatchCompleted {
                        tournament: id,
                        game: game.id,
                        winner: winner.clone(),
                    });
                }
                store.matches.insert(game.id, game);
            }

            let tournament = store.tournament_mut(id)?;
            tournament.status = TournamentStatus::Ongoing;
            tournament.current_round = 1;
            tournament.total_rounds = bracket.total_rounds;

            Ok(events)
        })?;

        for event in events {
            self.events.send(event);
        }

        Ok(())
    }

    /// Records a score for a scheduled match and advances the winner, or
    /// completes the tournament when the final is in. Prize distribution
    /// runs afterwards as its own transaction; its failure is logged and
    /// the match result stands (the payout is retried by an operator).
    ///
    /// # Errors
    ///
    /// `MatchAlreadyCompleted`, `MatchLocked` (locked or disputed),
    /// `MatchNotReady`, `Unauthorized` for a non-participant without the
    /// submit capability, `DrawNotAllowed` for equal scores.
    pub fn submit_score(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        game_id: Id,
        score_a: u32,
        score_b: u32,
    ) -> Result<(), CoreError> {
        let events = self.transaction(|store| {
            let game = store.game(game_id)?;
            match game.status {
                MatchStatus::Completed => return Err(CoreError::MatchAlreadyCompleted),
                MatchStatus::Disputed => return Err(CoreError::MatchLocked),
                MatchStatus::Scheduled => {}
            }
            if game.locked {
                return Err(CoreError::MatchLocked);
            }
            if !game.ready() {
                return Err(CoreError::MatchNotReady);
            }

            let tournament = game.tournament;
            let a = game.participant_a.clone().ok_or(CoreError::MatchNotReady)?;
            let b = game.participant_b.clone().ok_or(CoreError::MatchNotReady)?;

            let allowed = caps.contains(&Capability::SubmitAnyScore)
                || game.has_participant(actor)
                || store.entrant_owner(tournament, &a).as_deref() == Some(actor)
                || store.entrant_owner(tournament, &b).as_deref() == Some(actor);
            if !allowed {
                return Err(CoreError::Unauthorized);
            }

            if score_a == score_b {
                return Err(CoreError::DrawNotAllowed);
            }

            let winner = if score_a > score_b { a } else { b };
            store.record_result(game_id, winner, Some((score_a, score_b)))
        })?;

        self.finish(events)
    }

    /// Freezes a scheduled match until an operator resolves it.
    ///
    /// # Errors
    ///
    /// `MatchAlreadyCompleted`, `MatchLocked` if already disputed, or
    /// `Unauthorized`.
    pub fn dispute_match(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        game_id: Id,
    ) -> Result<(), CoreError> {
        self.transaction(|store| {
            let game = store.game(game_id)?;
            match game.status {
                MatchStatus::Completed => return Err(CoreError::MatchAlreadyCompleted),
                MatchStatus::Disputed => return Err(CoreError::MatchLocked),
                MatchStatus::Scheduled => {}
            }

            let tournament = game.tournament;
            let allowed = caps.contains(&Capability::ResolveDisputes)
                || game.has_participant(actor)
                || game
                    .participant_a
                    .as_deref()
                    .and_then(|entrant| store.entrant_owner(tournament, entrant))
                    .as_deref()
                    == Some(actor)
                || game
                    .participant_b
                    .as_deref()
                    .and_then(|entrant| store.entrant_owner(tournament, entrant))
                    .as_deref()
                    == Some(actor);
            if !allowed {
                return Err(CoreError::Unauthorized);
            }

            if let Some(game) = store.matches.get_mut(&game_id) {
                game.status = MatchStatus::Disputed;
            }
            Ok(())
        })
    }

    /// An operator ruling: names the winner of a disputed (or forfeited
    /// scheduled) match directly, with optional scores, and advances them.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without the dispute capability,
    /// `MatchAlreadyCompleted`, `MatchNotReady`, or `NotAParticipant`.
    pub fn resolve_match(
        &mut self,
        caps: &Capabilities,
        game_id: Id,
        winner: &str,
        scores: Option<(u32, u32)>,
    ) -> Result<(), CoreError> {
        if !caps.contains(&Capability::ResolveDisputes) {
            return Err(CoreError::Unauthorized);
        }

        let events = self.transaction(|store| {
            let game = store.game(game_id)?;
            if game.status == MatchStatus::Completed {
                return Err(CoreError::MatchAlreadyCompleted);
            }
            if !game.ready() {
                return Err(CoreError::MatchNotReady);
            }
            if !game.has_participant(winner) {
                return Err(CoreError::NotAParticipant(winner.to_string()));
            }

            store.record_result(game_id, winner.to_string(), scores)
        })?;

        self.finish(events)
    }

    /// # Errors
    ///
    /// `Unauthorized` or `MatchAlreadyCompleted`.
    pub fn lock_match(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        game_id: Id,
        locked: bool,
    ) -> Result<(), CoreError> {
        let tournament = self.game(game_id)?.tournament;
        self.authorize_manage(actor, caps, tournament)?;

        self.transaction(|store| {
            let game = store
                .matches
                .get_mut(&game_id)
                .ok_or(CoreError::MatchNotFound(game_id))?;
            if game.status == MatchStatus::Completed {
                return Err(CoreError::MatchAlreadyCompleted);
            }

            game.locked = locked;
            Ok(())
        })
    }

    /// The operator retry handle for a payout that failed after the final.
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `WrongTournamentStatus` before completion, or a
    /// ledger failure (nothing is credited then).
    pub fn distribute_prizes(
        &mut self,
        actor: &str,
        caps: &Capabilities,
        id: Id,
    ) -> Result<(), CoreError> {
        self.authorize_manage(actor, caps, id)?;
        self.distribute(id)
    }

    /// Credits the payout table down the finishing order and the host's
    /// earnings, exhausting the prize pool exactly, in one transaction.
    /// A no-op when the tournament already paid out.
    fn distribute(&mut self, id: Id) -> Result<(), CoreError> {
        self.transaction(|store| {
            let tournament = store.tournament(id)?;
            if tournament.status != TournamentStatus::Completed {
                return Err(CoreError::WrongTournamentStatus);
            }
            if tournament.paid_out {
                return Ok(());
            }

            let payouts = tournament.payouts.clone();
            let host = tournament.host.clone();
            let earning = tournament.collected - tournament.platform_fee() - tournament.prize_pool;

            let order = store.finishing_order(id);
            for payout in payouts {
                let entrant = order
                    .get(payout.position as usize - 1)
                    .ok_or(CoreError::PayoutMismatch)?
                    .clone();
                let owner = store
                    .entrant_owner(id, &entrant)
                    .unwrap_or_else(|| entrant.clone());
                store.ledger.credit(
                    &mut store.counters,
                    &owner,
                    payout.amount,
                    Source::Winning,
                    Some(id),
                )?;
            }

            if earning > 0 {
                store.ledger.credit(
                    &mut store.counters,
                    &host,
                    earning,
                    Source::HostEarning,
                    Some(id),
                )?;
            }

            store.tournament_mut(id)?.paid_out = true;
            Ok(())
        })
    }

    /// Champion first, then the final's loser, then losers of earlier
    /// rounds, later rounds first, by match number within a round. Byes
    /// produce no loser, so exactly the real entrants appear.
    fn finishing_order(&self, id: Id) -> Vec<String> {
        let mut games: Vec<_> = self
            .matches
            .values()
            .filter(|game| game.tournament == id)
            .collect();
        games.sort_unstable_by(|x, y| y.round.cmp(&x.round).then(x.number.cmp(&y.number)));

        let mut order = Vec::new();
        if let Some(final_game) = games.first()
            && let Some(winner) = &final_game.winner
        {
            order.push(winner.clone());
        }

        for game in games {
            if let Some(loser) = game.loser() {
                order.push(loser.to_string());
            }
        }

        order
    }

    fn record_result(
        &mut self,
        game_id: Id,
        winner: String,
        scores: Option<(u32, u32)>,
    ) -> Result<Vec<Event>, CoreError> {
        let game = self
            .matches
            .get_mut(&game_id)
            .ok_or(CoreError::MatchNotFound(game_id))?;

        if let Some((score_a, score_b)) = scores {
            game.score_a = Some(score_a);
            game.score_b = Some(score_b);
        }
        game.status = MatchStatus::Completed;
        game.winner = Some(winner.clone());

        let tournament = game.tournament;
        let next = game.next_match;
        let slot = game.slot_in_next;

        let mut events = vec![Event::MatchCompleted {
            tournament,
            game: game_id,
            winner: winner.clone(),
        }];

        if let (Some(next), Some(slot)) = (next, slot) {
            // advancement is passive: the next match becomes playable once
            // both slots are filled, nothing schedules it
            let next_game = self
                .matches
                .get_mut(&next)
                .ok_or(CoreError::MatchNotFound(next))?;
            next_game.fill_slot(slot, winner);
        } else {
            let tournament_state = self.tournament_mut(tournament)?;
            tournament_state.status = TournamentStatus::Completed;
            tournament_state.winner = Some(winner.clone());
            events.push(Event::TournamentCompleted {
                tournament,
                winner,
            });
        }

        self.bump_round(tournament)?;
        Ok(events)
    }

    fn bump_round(&mut self, id: Id) -> Result<(), CoreError> {
        let (current, total) = {
            let tournament = self.tournament(id)?;
            (tournament.current_round, tournament.total_rounds)
        };

        let mut round = current;
        while round < total
            && self
                .matches
                .values()
                .filter(|game| game.tournament == id && game.round == round)
                .all(|game| game.status == MatchStatus::Completed)
        {
            round += 1;
        }

        if round != current {
            self.tournament_mut(id)?.current_round = round;
        }
        Ok(())
    }

    fn finish(&mut self, events: Vec<Event>) -> Result<(), CoreError> {
        let mut completed = None;
        for event in &events {
            if let Event::TournamentCompleted { tournament, .. } = event {
                completed = Some(*tournament);
            }
        }

        for event in events {
            self.events.send(event);
        }

        if let Some(id) = completed {
            // best effort: the committed result stands whether or not the
            // payout lands, an operator can retry it
            if let Err(error) = self.distribute(id) {
                error!("prize distribution for tournament {id}: {error}");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::{capability, capability::Role, tournament::Payout};

    fn caps(role: Role) -> Capabilities {
        capability::capabilities(role)
    }

    fn deadline() -> DateTime<Utc> {
        Utc::now() + TimeDelta::days(1)
    }

    /// A store with a funded host and four funded players, and one
    /// tournament: fee 100, pool 900 as 600/300, 10% platform fee.
    fn arena() -> (Store, Id) {
        let mut store = Store::default();

        for name in ["freya", "player-1", "player-2", "player-3", "player-4"] {
            store.open_wallet(name);
            store.deposit(name, 1_000).unwrap();
        }

        let id = store
            .create_tournament(
                &caps(Role::Host),
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
                    platform_fee_bps: 1_000,
                    min_participants: 2,
                    max_participants: 8,
                    deadline: deadline(),
                    ..Tournament::default()
                },
            )
            .unwrap();

        (store, id)
    }

    fn join(store: &mut Store, id: Id, names: &[&str]) {
        for name in names {
            store
                .register(&caps(Role::Player), name, id, None, Utc::now())
                .unwrap();
        }
    }

    #[test]
    fn registration_collects_the_fee_once() {
        let (mut store, id) = arena();

        join(&mut store, id, &["player-1", "player-2"]);
        assert_eq!(store.tournament(id).unwrap().collected, 200);
        assert_eq!(store.ledger.wallet("player-1").unwrap().balance, 900);

        assert_eq!(
            store.register(&caps(Role::Player), "player-1", id, None, Utc::now()),
            Err(CoreError::AlreadyRegistered)
        );

        let late = Utc::now() + TimeDelta::days(2);
        assert_eq!(
            store.register(&caps(Role::Player), "player-3", id, None, late),
            Err(CoreError::RegistrationClosed)
        );

        store.unregister("player-2", id).unwrap();
        assert_eq!(store.tournament(id).unwrap().collected, 100);
        assert_eq!(store.ledger.wallet("player-2").unwrap().balance, 1_000);
        assert_eq!(
            store.unregister("player-2", id),
            Err(CoreError::NotRegistered)
        );
    }

    #[test]
    fn a_failed_registration_leaves_no_trace() {
        let (mut store, id) = arena();

        store.open_wallet("pauper");
        let rows = store.ledger.transactions.len();

        assert_eq!(
            store.register(&caps(Role::Player), "pauper", id, None, Utc::now()),
            Err(CoreError::InsufficientBalance)
        );

        assert_eq!(store.ledger.transactions.len(), rows);
        assert_eq!(store.tournament(id).unwrap().collected, 0);
        assert!(store.registrations.get(&id).unwrap().is_empty());
    }

    #[test]
    fn closing_short_of_entrants_cancels_and_refunds() {
        let (mut store, id) = arena();

        store.tournaments.get_mut(&id).unwrap().min_participants = 3;
        join(&mut store, id, &["player-1", "player-2"]);

        let outcome = store
            .close_registration("freya", &caps(Role::Host), id)
            .unwrap();
        assert_eq!(outcome, CloseOutcome::Cancelled);

        let tournament = store.tournament(id).unwrap();
        assert_eq!(tournament.status, TournamentStatus::Cancelled);
        assert_eq!(tournament.collected, 0);
        assert_eq!(store.ledger.wallet("player-1").unwrap().balance, 1_000);
        assert_eq!(store.ledger.wallet("player-2").unwrap().balance, 1_000);
    }

    #[test]
    fn closing_short_of_entrants_can_postpone_instead() {
        let (mut store, id) = arena();

        {
            let tournament = store.tournaments.get_mut(&id).unwrap();
            tournament.min_participants = 3;
            tournament.close_policy = ClosePolicy::Postpone;
        }
        join(&mut store, id, &["player-1", "player-2"]);

        let outcome = store
            .close_registration("freya", &caps(Role::Host), id)
            .unwrap();
        assert_eq!(outcome, CloseOutcome::Postponed);
        assert_eq!(
            store.tournament(id).unwrap().status,
            TournamentStatus::Postponed
        );
        // the money stays collected while postponed
        assert_eq!(store.tournament(id).unwrap().collected, 200);

        store
            .reschedule("freya", &caps(Role::Host), id, deadline())
            .unwrap();
        assert_eq!(
            store.tournament(id).unwrap().status,
            TournamentStatus::Upcoming
        );
    }

    #[test]
    fn only_the_host_or_an_admin_manages_a_tournament() {
        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2"]);

        assert_eq!(
            store.close_registration("player-1", &caps(Role::Player), id),
            Err(CoreError::Unauthorized)
        );
        assert_eq!(
            store.start_bracket("loki", &caps(Role::Host), id),
            Err(CoreError::Unauthorized)
        );

        store
            .start_bracket("admin", &caps(Role::Admin), id)
            .unwrap();
    }

    #[test]
    fn the_bracket_starts_exactly_once() {
        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2"]);

        store.start_bracket("freya", &caps(Role::Host), id).unwrap();
        assert_eq!(
            store.tournament(id).unwrap().status,
            TournamentStatus::Ongoing
        );

        assert_eq!(
            store.start_bracket("freya", &caps(Role::Host), id),
            Err(CoreError::BracketAlreadyStarted)
        );
    }

    #[test]
    fn scores_advance_winners_and_complete_the_tournament() {
        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2", "player-3", "player-4"]);

        let entrants = vec![
            "player-1".to_string(),
            "player-2".to_string(),
            "player-3".to_string(),
            "player-4".to_string(),
        ];
        store
            .start_bracket_seeded("freya", &caps(Role::Host), id, entrants)
            .unwrap();

        // seeding first slots then second: 1v3 and 2v4
        let games = store.matches_for(id);
        assert_eq!(games.len(), 3);
        let (semi_1, semi_2) = (games[0].id, games[1].id);
        let final_id = games[2].id;

        assert_eq!(
            store.submit_score("player-1", &caps(Role::Player), semi_1, 2, 2),
            Err(CoreError::DrawNotAllowed)
        );
        assert_eq!(
            store.submit_score("loki", &caps(Role::Player), semi_1, 2, 0),
            Err(CoreError::Unauthorized)
        );
        assert_eq!(
            store.submit_score("player-1", &caps(Role::Player), final_id, 1, 0),
            Err(CoreError::MatchNotReady)
        );

        store
            .submit_score("player-1", &caps(Role::Player), semi_1, 2, 0)
            .unwrap();
        assert_eq!(
            store.submit_score("player-3", &caps(Role::Player), semi_1, 0, 2),
            Err(CoreError::MatchAlreadyCompleted)
        );
        assert_eq!(store.tournament(id).unwrap().current_round, 1);

        store
            .submit_score("player-4", &caps(Role::Player), semi_2, 0, 1)
            .unwrap();
        assert_eq!(store.tournament(id).unwrap().current_round, 2);

        let final_game = store.game(final_id).unwrap();
        assert_eq!(final_game.participant_a.as_deref(), Some("player-1"));
        assert_eq!(final_game.participant_b.as_deref(), Some("player-4"));

        store
            .submit_score("player-1", &caps(Role::Player), final_id, 3, 1)
            .unwrap();

        let tournament = store.tournament(id).unwrap();
        assert_eq!(tournament.status, TournamentStatus::Completed);
        assert_eq!(tournament.winner.as_deref(), Some("player-1"));
        assert!(tournament.paid_out);

        // 600 to the champion, 300 to the runner-up
        assert_eq!(store.ledger.wallet("player-1").unwrap().balance, 1_500);
        assert_eq!(store.ledger.wallet("player-4").unwrap().balance, 1_200);

        // collected 400, platform fee 40, pool 900: the host owes more
        // than came in, so no earnings are credited
        assert_eq!(store.ledger.wallet("freya").unwrap().balance, 1_000);

        for name in ["freya", "player-1", "player-2", "player-3", "player-4"] {
            let wallet = store.ledger.wallet(name).unwrap();
            assert!(wallet.locked >= 0 && wallet.locked <= wallet.balance);
            assert_eq!(store.ledger.replay(name), wallet.balance);
        }
    }

    #[test]
    fn disputes_freeze_a_match_until_resolved() {
        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2"]);
        store
            .start_bracket_seeded(
                "freya",
                &caps(Role::Host),
                id,
                vec!["player-1".to_string(), "player-2".to_string()],
            )
            .unwrap();

        let game_id = store.matches_for(id)[0].id;

        store
            .dispute_match("player-2", &caps(Role::Player), game_id)
            .unwrap();
        assert_eq!(
            store.submit_score("player-1", &caps(Role::Player), game_id, 1, 0),
            Err(CoreError::MatchLocked)
        );
        assert_eq!(
            store.resolve_match(&caps(Role::Player), game_id, "player-2", None),
            Err(CoreError::Unauthorized)
        );

        store
            .resolve_match(&caps(Role::Admin), game_id, "player-2", None)
            .unwrap();
        assert_eq!(
            store.tournament(id).unwrap().winner.as_deref(),
            Some("player-2")
        );
    }

    #[test]
    fn locked_matches_reject_scores() {
        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2"]);
        store
            .start_bracket_seeded(
                "freya",
                &caps(Role::Host),
                id,
                vec!["player-1".to_string(), "player-2".to_string()],
            )
            .unwrap();

        let game_id = store.matches_for(id)[0].id;
        store
            .lock_match("freya", &caps(Role::Host), game_id, true)
            .unwrap();
        assert_eq!(
            store.submit_score("player-1", &caps(Role::Player), game_id, 1, 0),
            Err(CoreError::MatchLocked)
        );

        store
            .lock_match("freya", &caps(Role::Host), game_id, false)
            .unwrap();
        store
            .submit_score("player-1", &caps(Role::Player), game_id, 1, 0)
            .unwrap();
    }

    #[test]
    fn byes_fire_match_completed_events_at_start() {
        use std::sync::mpsc;

        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2", "player-3"]);

        let (tx, rx) = mpsc::channel();
        store.events = Messenger::new(tx);

        store
            .start_bracket_seeded(
                "freya",
                &caps(Role::Host),
                id,
                vec![
                    "player-1".to_string(),
                    "player-2".to_string(),
                    "player-3".to_string(),
                ],
            )
            .unwrap();

        // four slots, one bye: player-2 advanced without playing
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![Event::MatchCompleted {
                tournament: id,
                game: store
                    .matches_for(id)
                    .iter()
                    .find(|game| game.is_bye)
                    .unwrap()
                    .id,
                winner: "player-2".to_string(),
            }]
        );
    }

    #[test]
    fn the_payout_retry_is_idempotent() {
        let (mut store, id) = arena();
        join(&mut store, id, &["player-1", "player-2"]);
        store
            .start_bracket_seeded(
                "freya",
                &caps(Role::Host),
                id,
                vec!["player-1".to_string(), "player-2".to_string()],
            )
            .unwrap();

        let game_id = store.matches_for(id)[0].id;
        store
            .submit_score("player-1", &caps(Role::Player), game_id, 1, 0)
            .unwrap();

        let balance = store.ledger.wallet("player-1").unwrap().balance;
        store
            .distribute_prizes("freya", &caps(Role::Host), id)
            .unwrap();
        assert_eq!(store.ledger.wallet("player-1").unwrap().balance, balance);
    }
}
