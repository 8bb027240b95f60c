use std::{fmt, sync::mpsc::Sender};

use crate::Id;

/// Signals fired after a store transaction commits, for out of process
/// mirroring. Consumers must treat them as notifications, the store is the
/// source of truth.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    MatchCompleted {
        tournament: Id,
        game: Id,
        winner: String,
    },
    TournamentCompleted {
        tournament: Id,
        winner: String,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchCompleted {
                tournament,
                game,
                winner,
            } => {
                write!(f, "match_completed {tournament} {game} {winner}")
            }
            Self::TournamentCompleted { tournament, winner } => {
                write!(f, "tournament_completed {tournament} {winner}")
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Messenger(Option<Sender<Event>>);

impl Messenger {
    #[must_use]
    pub fn new(sender: Sender<Event>) -> Self {
        Self(Some(sender))
    }

    pub fn send(&self, event: Event) {
        if let Some(sender) = &self.0 {
            let _ok = sender.send(event);
        }
    }
}
