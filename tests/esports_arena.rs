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

use std::sync::mpsc;

use chrono::{TimeDelta, Utc};
use esports_arena::{
    capability::{Role, capabilities},
    event::{Event, Messenger},
    store::Store,
    tournament::{Payout, Tournament, TournamentStatus},
};

const PLAYERS: [&str; 5] = ["player-1", "player-2", "player-3", "player-4", "player-5"];

/// Five entrants, three byes, an entry fee and a three position payout
/// table: the whole lifecycle from deposits to prize distribution.
#[test]
fn a_five_player_tournament_pays_out() -> anyhow::Result<()> {
    let mut store = Store::default();
    let (event_tx, event_rx) = mpsc::channel();
    store.events = Messenger::new(event_tx);

    store.open_wallet("freya");
    store.deposit("freya", 1_000)?;
    for name in PLAYERS {
        store.open_wallet(name);
        store.deposit(name, 1_000)?;
    }

    let host_caps = capabilities(Role::Host);
    let player_caps = capabilities(Role::Player);

    let id = store.create_tournament(
        &host_caps,
        Tournament {
            name: "midsummer-cup".to_string(),
            host: "freya".to_string(),
            entry_fee: 250,
            prize_pool: 1_000,
            payouts: vec![
                Payout {
                    position: 1,
                    amount: 600,
                },
                Payout {
                    position: 2,
                    amount: 300,
                },
                Payout {
                    position: 3,
                    amount: 100,
                },
            ],
            platform_fee_bps: 1_000,
            min_participants: 3,
            max_participants: 8,
            deadline: Utc::now() + TimeDelta::days(1),
            ..Tournament::default()
        },
    )?;

    for name in PLAYERS {
        store.register(&player_caps, name, id, None, Utc::now())?;
    }
    assert_eq!(store.tournament(id)?.collected, 1_250);

    let entrants: Vec<String> = PLAYERS.iter().map(|name| (*name).to_string()).collect();
    store.start_bracket_seeded("freya", &host_caps, id, entrants)?;

    // eight slots: seven matches over three rounds, three of them byes
    let tournament = store.tournament(id)?;
    assert_eq!(tournament.status, TournamentStatus::Ongoing);
    assert_eq!(tournament.total_rounds, 3);
    assert_eq!(tournament.current_round, 1);

    let games = store.matches_for(id);
    assert_eq!(games.len(), 7);
    assert_eq!(games.iter().filter(|game| game.is_bye).count(), 3);
    assert_eq!(
        games
            .iter()
            .filter(|game| game.next_match.is_none())
            .count(),
        1
    );

    // the byes completed before any human submitted a score
    let start_events: Vec<_> = event_rx.try_iter().collect();
    assert_eq!(start_events.len(), 3);
    assert!(
        start_events
            .iter()
            .all(|event| matches!(event, Event::MatchCompleted { .. }))
    );

    // round one: player-1 against player-5, the rest advanced on byes
    let opening = games
        .iter()
        .find(|game| game.round == 1 && !game.is_bye)
        .map(|game| game.id)
        .ok_or_else(|| anyhow::Error::msg("no opening match"))?;
    drop(games);

    store.submit_score("player-1", &player_caps, opening, 3, 1)?;
    assert_eq!(store.tournament(id)?.current_round, 2);

    // round two, in bracket order: (player-1, player-2) and
    // (player-3, player-4)
    let round_two: Vec<_> = store
        .matches_for(id)
        .iter()
        .filter(|game| game.round == 2)
        .map(|game| game.id)
        .collect();

    store.submit_score("player-3", &player_caps, round_two[1], 0, 2)?;
    store.submit_score("player-2", &player_caps, round_two[0], 2, 0)?;
    assert_eq!(store.tournament(id)?.current_round, 3);

    let final_id = store
        .matches_for(id)
        .iter()
        .find(|game| game.round == 3)
        .map(|game| game.id)
        .ok_or_else(|| anyhow::Error::msg("no final"))?;

    let final_game = store.game(final_id)?;
    assert_eq!(final_game.participant_a.as_deref(), Some("player-1"));
    assert_eq!(final_game.participant_b.as_deref(), Some("player-4"));

    store.submit_score("player-4", &player_caps, final_id, 5, 3)?;

    // completed exactly once, the winner recorded, the payout landed
    let tournament = store.tournament(id)?;
    assert_eq!(tournament.status, TournamentStatus::Completed);
    assert_eq!(tournament.winner.as_deref(), Some("player-1"));
    assert_eq!(tournament.current_round, 3);
    assert!(tournament.paid_out);

    // finishing order: champion, the final's loser, the round-two loser
    // with the lower match number
    assert_eq!(store.ledger.wallet("player-1")?.balance, 1_350);
    assert_eq!(store.ledger.wallet("player-4")?.balance, 1_050);
    assert_eq!(store.ledger.wallet("player-2")?.balance, 850);
    assert_eq!(store.ledger.wallet("player-3")?.balance, 750);
    assert_eq!(store.ledger.wallet("player-5")?.balance, 750);

    // host earnings: 1250 collected - 125 platform fee - 1000 prizes
    assert_eq!(store.ledger.wallet("freya")?.balance, 1_125);

    // four submitted results, the final also completes the tournament
    let play_events: Vec<_> = event_rx.try_iter().collect();
    assert_eq!(play_events.len(), 5);
    assert!(matches!(
        play_events.last(),
        Some(Event::TournamentCompleted { winner, .. }) if winner == "player-1"
    ));

    // the ledger balances, and only the platform fee left the system
    let mut total = 0;
    for name in PLAYERS.iter().chain(["freya"].iter()) {
        let wallet = store.ledger.wallet(name)?;
        assert!(wallet.locked >= 0 && wallet.locked <= wallet.balance);
        assert_eq!(store.ledger.replay(name), wallet.balance);
        total += wallet.balance;
    }
    assert_eq!(total, 6_000 - 125);

    Ok(())
}

/// The deadline scenario: two confirmed entrants, three required, policy
/// cancel. Everyone gets their fee back and the tournament dies.
#[test]
fn cancelling_refunds_every_entrant() -> anyhow::Result<()> {
    let mut store = Store::default();

    store.open_wallet("freya");
    for name in ["player-1", "player-2"] {
        store.open_wallet(name);
        store.deposit(name, 100)?;
    }

    let host_caps = capabilities(Role::Host);
    let id = store.create_tournament(
        &host_caps,
        Tournament {
            name: "ghost-cup".to_string(),
            host: "freya".to_string(),
            entry_fee: 100,
            min_participants: 3,
            max_participants: 8,
            deadline: Utc::now() + TimeDelta::days(1),
            ..Tournament::default()
        },
    )?;

    let player_caps = capabilities(Role::Player);
    for name in ["player-1", "player-2"] {
        store.register(&player_caps, name, id, None, Utc::now())?;
        assert_eq!(store.ledger.wallet(name)?.balance, 0);
    }
    assert_eq!(store.tournament(id)?.collected, 200);

    let outcome = store.close_registration("freya", &host_caps, id)?;
    assert_eq!(outcome.to_string(), "cancelled");

    let tournament = store.tournament(id)?;
    assert_eq!(tournament.status, TournamentStatus::Cancelled);
    assert_eq!(tournament.collected, 0);

    for name in ["player-1", "player-2"] {
        assert_eq!(store.ledger.wallet(name)?.balance, 100);
        assert_eq!(store.ledger.replay(name), 100);
    }

    Ok(())
}
