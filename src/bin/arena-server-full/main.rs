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

#![deny(clippy::expect_used)]
#![deny(clippy::indexing_slicing)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]

mod accounts;
mod command_line;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    process::exit,
    str::FromStr,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use clap::Parser;
use esports_arena::{
    Coins, Id, SERVER_PORT, VERSION_ID,
    bracket::Match,
    capability::{Capabilities, Capability, Role, capabilities},
    event::Messenger,
    ledger::Direction,
    store::{CloseOutcome, Store},
    tournament::{ArchivedTournament, ClosePolicy, Kind, Payout, Tournament, TournamentStatus},
    utils::{self, data_file},
};
use log::{debug, error, info};
use old_rand::rngs::OsRng;
use password_hash::SaltString;
use serde::{Deserialize, Serialize};

use crate::{
    accounts::{Account, Accounts},
    command_line::Args,
};

const SERVER_FILE: &str = "arena.ron";
const ACTIVE_MATCHES_FILE: &str = "active-matches.postcard";
const ARCHIVED_TOURNAMENTS_FILE: &str = "archived-tournaments.ron";

const HOUR_IN_SECONDS: u64 = 60 * 60;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger("arena_server_full", args.debug, args.systemd);

    if args.man {
        return Args::generate_man_page();
    }

    utils::create_data_folder()?;

    let (tx, rx) = mpsc::channel();
    let mut server = Server::default();

    if args.skip_the_data_file {
        server.skip_the_data_files = true;
    } else {
        server.load_data_files(tx.clone(), args.systemd)?;
    }

    let (event_tx, event_rx) = mpsc::channel();
    server.store.events = Messenger::new(event_tx);

    // post-commit signals re-enter the loop as internal messages
    let event_loop_tx = tx.clone();
    thread::spawn(move || {
        for event in event_rx {
            handle_error(event_loop_tx.send((format!("0 server event {event}"), None)));
        }
    });

    thread::spawn(move || handle_error(server.handle_messages(&rx)));

    if !args.skip_the_sweep {
        Server::sweep_deadlines(tx.clone());
    }

    Server::save(tx.clone());

    let mut address = "[::]".to_string();
    address.push_str(SERVER_PORT);

    let listener = match TcpListener::bind(&address) {
        Ok(listener) => listener,
        Err(error) => {
            error!("TcpLister::bind: {error}");

            address = "0.0.0.0".to_string();
            address.push_str(SERVER_PORT);
            TcpListener::bind(&address)?
        }
    };

    info!("listening on {address} ...");

    for (index, stream) in (1..).zip(listener.incoming()) {
        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                error!("stream: {error}");
                continue;
            }
        };

        let tx = tx.clone();

        thread::spawn(move || {
            if let Err(error) = login(index, stream, &tx) {
                error!("login: {error}");
            }
        });
    }

    Ok(())
}

fn login(
    id: usize,
    mut stream: TcpStream,
    tx: &Sender<(String, Option<Sender<String>>)>,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut buf = String::new();
    let (client_tx, client_rx) = mpsc::channel();
    let mut username_proper = "_".to_string();
    let mut login_successful = false;

    for _ in 0..100 {
        reader.read_line(&mut buf)?;

        for ch in buf.trim().chars() {
            if ch.is_control() || ch == '\0' {
                return Err(anyhow::Error::msg(
                    "there are control characters in the username or password",
                ));
            }
        }

        if buf.trim().is_empty() {
            return Err(anyhow::Error::msg(
                "The user sent a command without logging in, then quit.",
            ));
        }

        let buf_clone = buf.clone();
        let mut username_password_etc = buf_clone.split_ascii_whitespace();

        let version_id = username_password_etc.next();
        let create_account_login = username_password_etc.next();
        let username_option = username_password_etc.next();

        if let (Some(version_id), Some(create_account_login), Some(username)) =
            (version_id, create_account_login, username_option)
        {
            username_proper = username.to_string();
            if version_id != VERSION_ID {
                stream.write_all(b"? login wrong_version\n")?;
                buf.clear();
                continue;
            }

            let password: Vec<&str> = username_password_etc.collect();
            let password = password.join(" ");

            if username.len() > 16 {
                stream.write_all(b"? login _ username is more than 16 characters\n")?;
                buf.clear();
                continue;
            }
            if password.len() > 32 {
                stream.write_all(b"? login _ password is more than 32 characters\n")?;
                buf.clear();
                continue;
            }

            debug!("{id} {username} {create_account_login}");

            tx.send((
                format!("{id} {username} {create_account_login} {password}"),
                Some(client_tx.clone()),
            ))?;

            let message = client_rx.recv()?;
            buf.clear();
            if create_account_login == "login" {
                if "= login" == message.as_str() {
                    login_successful = true;
                    break;
                }

                stream.write_all(b"? login multiple_possible_errors\n")?;
                continue;
            } else if create_account_login == "create_account" {
                if "= create_account" == message.as_str() {
                    login_successful = true;
                    break;
                }

                stream.write_all(b"? create_account\n")?;
                continue;
            }

            stream.write_all(b"? login _\n")?;
        }

        buf.clear();
    }

    if !login_successful {
        return Err(anyhow::Error::msg("the user failed to login"));
    }
    stream.write_all(b"= login\n")?;

    thread::spawn(move || {
        if let Err(error) = receiving_and_writing(stream, &client_rx) {
            error!("receiving_and_writing: {error}");
        }
    });

    tx.send((format!("{id} {username_proper} wallet"), None))?;
    tx.send((format!("{id} {username_proper} tournaments"), None))?;
    tx.send((format!("{id} {username_proper} admin"), None))?;

    'outer: for _ in 0..1_000_000 {
        if let Err(err) = reader.read_line(&mut buf) {
            error!("reader.read_line(): {err}");
            break 'outer;
        }

        let buf_str = buf.trim();

        if buf_str.is_empty() {
            break 'outer;
        }

        for char in buf_str.chars() {
            if char.is_control() || char == '\0' {
                break 'outer;
            }
        }

        tx.send((format!("{id} {username_proper} {buf_str}"), None))?;
        buf.clear();
    }

    tx.send((format!("{id} {username_proper} logout"), None))?;
    Ok(())
}

fn receiving_and_writing<T: Send + Write>(
    mut stream: T,
    client_rx: &Receiver<String>,
) -> anyhow::Result<()> {
    for mut message in client_rx {
        if message.as_str() == "= logout" {
            return Ok(());
        }

        message.push('\n');
        if let Err(error) = stream.write_all(message.as_bytes()) {
            return Err(anyhow::Error::msg(format!("{message}: {error}")));
        }
    }

    Ok(())
}

fn handle_error<T, E: fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            error!("{error}");
            exit(1)
        }
    }
}

fn hash_password(password: &str) -> Option<String> {
    let ctx = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);
    Some(
        ctx.hash_password(password.as_bytes(), &salt)
            .ok()?
            .to_string(),
    )
}

fn parse_date(date: &str) -> anyhow::Result<DateTime<Utc>> {
    let datetime = DateTime::parse_from_str(
        &format!("{date} 00:00:00 +0000"),
        "%Y-%m-%d %H:%M:%S %z",
    )?;

    Ok(datetime.to_utc())
}

type Reply = Option<(Sender<String>, bool, String)>;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct Server {
    #[serde(default)]
    admins: HashSet<String>,
    #[serde(default)]
    accounts: Accounts,
    #[serde(default)]
    store: Store,
    #[serde(skip)]
    archived_tournaments: Vec<ArchivedTournament>,
    #[serde(skip)]
    clients: HashMap<usize, Sender<String>>,
    #[serde(skip)]
    skip_the_data_files: bool,
}

impl Server {
    fn capabilities_for(&self, username: &str) -> Capabilities {
        if self.admins.contains(username) {
            return capabilities(Role::Admin);
        }

        let role = self
            .accounts
            .0
            .get(username)
            .map(|account| account.role)
            .unwrap_or_default();
        capabilities(role)
    }

    fn channel(&self, index_supplied: usize) -> Option<Sender<String>> {
        self.clients.get(&index_supplied).cloned()
    }

    /// Folds a core result into the protocol's `=`/`?` envelope. The error
    /// prose is the user-facing message.
    fn respond<E: fmt::Display>(
        channel: Sender<String>,
        command: &str,
        result: Result<String, E>,
    ) -> Reply {
        match result {
            Ok(extra) if extra.is_empty() => Some((channel, true, command.to_string())),
            Ok(extra) => Some((channel, true, format!("{command} {extra}"))),
            Err(error) => Some((channel, false, format!("{command} {error}"))),
        }
    }

    fn handle_messages(
        &mut self,
        rx: &Receiver<(String, Option<Sender<String>>)>,
    ) -> anyhow::Result<()> {
        loop {
            if let Some((tx, ok, command)) = self.handle_messages_internal(rx) {
                if ok {
                    tx.send(format!("= {command}"))?;
                } else {
                    tx.send(format!("? {command}"))?;
                }
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle_messages_internal(
        &mut self,
        rx: &Receiver<(String, Option<Sender<String>>)>,
    ) -> Reply {
        let (message, option_tx) = rx.recv().ok()?;
        let index_username_command: Vec<_> = message.split_ascii_whitespace().collect();

        if let (Some(index_supplied), Some(username), Some(command)) = (
            index_username_command.first(),
            index_username_command.get(1),
            index_username_command.get(2),
        ) {
            if *command != "create_account"
                && *command != "event"
                && *command != "login"
                && *command != "logout"
                && *command != "ping"
                && *command != "sweep"
            {
                debug!("{index_supplied} {username} {command}");
            }

            let index_supplied = index_supplied.parse::<usize>().ok()?;
            let the_rest: Vec<_> = index_username_command.clone().into_iter().skip(3).collect();

            match *command {
                "admin" => {
                    if self
                        .capabilities_for(username)
                        .contains(&Capability::ResolveDisputes)
                    {
                        self.channel(index_supplied)?
                            .send("= admin".to_string())
                            .ok()?;
                    }

                    None
                }
                "approve_withdrawal" => {
                    self.approve_withdrawal(username, index_supplied, command, &the_rest)
                }
                "bracket" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    let games = self.store.matches_for(id);
                    Self::respond(channel, command, ron::ser::to_string(&games))
                }
                "cancel_tournament" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} cancel_tournament {id}");
                    let caps = self.capabilities_for(username);
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .cancel_tournament(username, &caps, id)
                            .map(|()| String::new()),
                    )
                }
                "change_password" => {
                    self.change_password(username, index_supplied, command, &the_rest)
                }
                "close_registration" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} close_registration {id}");
                    let caps = self.capabilities_for(username);
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .close_registration(username, &caps, id)
                            .map(|outcome| outcome.to_string()),
                    )
                }
                "create_account" => {
                    self.create_account(username, index_supplied, command, &the_rest, option_tx)
                }
                "delete_account" => self.delete_account(username, index_supplied, command),
                "deposit" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(amount)) = the_rest.first().map(|amount| amount.parse::<Coins>())
                    else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} deposit {amount}");
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .deposit(username, amount)
                            .map(|id| id.to_string()),
                    )
                }
                "dispute" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} dispute {id}");
                    let caps = self.capabilities_for(username);
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .dispute_match(username, &caps, id)
                            .map(|()| String::new()),
                    )
                }
                "event" => {
                    if *username != "server" {
                        return None;
                    }

                    let the_rest = the_rest.join(" ");
                    info!("event {the_rest}");

                    for tx in self.clients.values() {
                        let _ok = tx.send(format!("= event {the_rest}"));
                    }

                    let words: Vec<_> = the_rest.split_ascii_whitespace().collect();
                    if let (Some(&"tournament_completed"), Some(id)) =
                        (words.first(), words.get(1))
                        && let Ok(id) = id.parse::<Id>()
                    {
                        self.archive_tournament(id);
                    }

                    None
                }
                "exit" => {
                    if *username != "server" {
                        return None;
                    }

                    info!("saving active matches...");
                    let games: Vec<&Match> = self.store.matches.values().collect();

                    let mut file = handle_error(File::create(data_file(ACTIVE_MATCHES_FILE)));
                    handle_error(
                        file.write_all(handle_error(postcard::to_allocvec(&games)).as_slice()),
                    );

                    exit(0);
                }
                "history" => {
                    let channel = self.channel(index_supplied)?;
                    Self::respond(
                        channel,
                        command,
                        ron::ser::to_string(&self.archived_tournaments),
                    )
                }
                "join_tournament" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };
                    let entrant = the_rest.get(1).copied();

                    info!("{index_supplied} {username} join_tournament {id}");
                    let caps = self.capabilities_for(username);
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .register(&caps, username, id, entrant, Utc::now())
                            .map(|()| String::new()),
                    )
                }
                "leave_tournament" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} leave_tournament {id}");
                    Self::respond(
                        channel,
                        command,
                        self.store.unregister(username, id).map(|()| String::new()),
                    )
                }
                "lock_match" | "unlock_match" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} {command} {id}");
                    let caps = self.capabilities_for(username);
                    let locked = *command == "lock_match";
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .lock_match(username, &caps, id, locked)
                            .map(|()| String::new()),
                    )
                }
                "login" => self.login(username, index_supplied, command, &the_rest, option_tx),
                "logout" => self.logout(username, index_supplied, command),
                "new_tournament" => {
                    self.new_tournament(username, index_supplied, command, &the_rest)
                }
                "payout" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} payout {id}");
                    let caps = self.capabilities_for(username);
                    let result = self.store.distribute_prizes(username, &caps, id);
                    if result.is_ok() {
                        self.archive_tournament(id);
                    }

                    Self::respond(channel, command, result.map(|()| String::new()))
                }
                "ping" => Some((self.channel(index_supplied)?, true, (*command).to_string())),
                "reschedule" => {
                    let channel = self.channel(index_supplied)?;
                    let (Some(Ok(id)), Some(date)) = (
                        the_rest.first().map(|id| id.parse::<Id>()),
                        the_rest.get(1),
                    ) else {
                        return Some((channel, false, (*command).to_string()));
                    };
                    let Ok(deadline) = parse_date(date) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} reschedule {id} {date}");
                    let caps = self.capabilities_for(username);
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .reschedule(username, &caps, id, deadline)
                            .map(|()| String::new()),
                    )
                }
                "resolve_match" => {
                    self.resolve_match(username, index_supplied, command, &the_rest)
                }
                "save" => {
                    if *username != "server" {
                        return None;
                    }

                    debug!("saving the server file...");
                    self.save_server();

                    None
                }
                "set_role" => self.set_role(username, index_supplied, command, &the_rest),
                "start_tournament" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} start_tournament {id}");
                    let caps = self.capabilities_for(username);
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .start_bracket(username, &caps, id)
                            .map(|()| String::new()),
                    )
                }
                "submit_score" => {
                    self.submit_score(username, index_supplied, command, &the_rest)
                }
                "sweep" => {
                    if *username != "server" {
                        return None;
                    }

                    self.sweep();
                    None
                }
                "tournament" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(id)) = the_rest.first().map(|id| id.parse::<Id>()) else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    match self.store.tournament(id) {
                        Ok(tournament) => {
                            Self::respond(channel, command, ron::ser::to_string(tournament))
                        }
                        Err(error) => Some((channel, false, format!("{command} {error}"))),
                    }
                }
                "tournaments" => {
                    let channel = self.channel(index_supplied)?;
                    let tournaments = self.store.tournaments_by_id();
                    Self::respond(channel, command, ron::ser::to_string(&tournaments))
                }
                "transactions" => {
                    let channel = self.channel(index_supplied)?;
                    let history: Vec<_> = self.store.ledger.history(username).collect();
                    Self::respond(channel, command, ron::ser::to_string(&history))
                }
                "wallet" => {
                    let channel = self.channel(index_supplied)?;
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .ledger
                            .wallet(username)
                            .map(|wallet| wallet.to_string()),
                    )
                }
                "wallet_credit" | "wallet_debit" => {
                    self.wallet_adjust(username, index_supplied, command, &the_rest)
                }
                "withdraw" => {
                    let channel = self.channel(index_supplied)?;
                    let Some(Ok(amount)) = the_rest.first().map(|amount| amount.parse::<Coins>())
                    else {
                        return Some((channel, false, (*command).to_string()));
                    };

                    info!("{index_supplied} {username} withdraw {amount}");
                    Self::respond(
                        channel,
                        command,
                        self.store
                            .request_withdrawal(username, amount)
                            .map(|id| id.to_string()),
                    )
                }
                "withdrawals" => {
                    let channel = self.channel(index_supplied)?;
                    if !self
                        .capabilities_for(username)
                        .contains(&Capability::ApproveWithdrawals)
                    {
                        return Some((channel, false, (*command).to_string()));
                    }

                    let pending: Vec<_> = self.store.ledger.pending_withdrawals().collect();
                    Self::respond(channel, command, ron::ser::to_string(&pending))
                }
                "=" => None,
                _ => self.clients.get(&index_supplied).map(|channel| {
                    error!("{index_supplied} {username} {command}");
                    (channel.clone(), false, (*command).to_string())
                }),
            }
        } else {
            error!("{index_username_command:?}");
            None
        }
    }

    fn approve_withdrawal(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        let channel = self.channel(index_supplied)?;
        let (Some(user), Some(Ok(id))) = (
            the_rest.first(),
            the_rest.get(1).map(|id| id.parse::<Id>()),
        ) else {
            return Some((channel, false, (*command).to_string()));
        };

        info!("{index_supplied} {username} approve_withdrawal {user} {id}");
        let caps = self.capabilities_for(username);
        Self::respond(
            channel,
            command,
            self.store
                .approve_withdrawal(&caps, user, id)
                .map(|()| String::new()),
        )
    }

    fn archive_tournament(&mut self, id: Id) {
        let Ok(tournament) = self.store.tournament(id) else {
            return;
        };

        // the bracket stays hot until the payout landed, the finishing
        // order is computed from it
        if !tournament.paid_out {
            return;
        }
        let tournament = tournament.clone();

        let mut games: Vec<Match> = Vec::new();
        self.store.matches.retain(|_, game| {
            if game.tournament == id {
                games.push(game.clone());
                false
            } else {
                true
            }
        });
        games.sort_unstable_by_key(|game| (game.round, game.number));

        let archived = ArchivedTournament::new(tournament, games);

        if !self.skip_the_data_files {
            match ron::ser::to_string(&archived) {
                Ok(mut line) => {
                    line.push('\n');

                    let result = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(data_file(ARCHIVED_TOURNAMENTS_FILE))
                        .and_then(|mut file| file.write_all(line.as_bytes()));
                    if let Err(error) = result {
                        error!("archive_tournament: {error}");
                    }
                }
                Err(error) => error!("archive_tournament: {error}"),
            }
        }

        self.archived_tournaments.push(archived);
    }

    /// ```sh
    /// # PASSWORD can be the empty string.
    /// <- change_password PASSWORD
    /// -> = change_password
    /// ```
    fn change_password(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        info!("{index_supplied} {username} change_password");

        let account = self.accounts.0.get_mut(username)?;
        let password = the_rest.join(" ");

        if password.len() > 32 {
            return Some((
                self.channel(index_supplied)?,
                false,
                format!("{command} password is greater than 32 characters"),
            ));
        }

        let hash = hash_password(&password)?;
        account.password = hash;

        Some((self.channel(index_supplied)?, true, (*command).to_string()))
    }

    /// ```sh
    /// # PASSWORD can be the empty string.
    /// <- VERSION_ID create_account player-1 PASSWORD
    /// -> = login
    /// ```
    ///
    /// Creating an account also opens its zero balance wallet.
    fn create_account(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
        option_tx: Option<Sender<String>>,
    ) -> Reply {
        let password = the_rest.join(" ");
        let tx = option_tx?;

        if self.accounts.0.contains_key(username) || username == "server" {
            info!("{index_supplied} {username} is already in the database");
            Some((tx, false, (*command).to_string()))
        } else {
            info!("{index_supplied} {username} created user account");

            let hash = hash_password(&password)?;
            self.clients.insert(index_supplied, tx);
            self.accounts.0.insert(
                (*username).to_string(),
                Account {
                    password: hash,
                    logged_in: Some(index_supplied),
                    ..Default::default()
                },
            );
            self.store.open_wallet(username);

            Some((self.channel(index_supplied)?, true, (*command).to_string()))
        }
    }

    /// Refused while money remains. The wallet and its history outlive the
    /// account either way.
    fn delete_account(&mut self, username: &str, index_supplied: usize, command: &str) -> Reply {
        let channel = self.channel(index_supplied)?;

        if let Ok(wallet) = self.store.ledger.wallet(username)
            && wallet.balance > 0
        {
            return Some((
                channel,
                false,
                format!("{command} the wallet still holds {}", wallet.balance),
            ));
        }

        info!("{index_supplied} {username} delete_account");
        self.accounts.0.remove(username);

        None
    }

    fn load_data_files(
        &mut self,
        tx: Sender<(String, Option<Sender<String>>)>,
        systemd: bool,
    ) -> anyhow::Result<()> {
        let server_file = data_file(SERVER_FILE);
        match &fs::read_to_string(&server_file) {
            Ok(string) => match ron::from_str(string.as_str()) {
                Ok(server_ron) => {
                    *self = server_ron;
                }
                Err(err) => {
                    return Err(anyhow::Error::msg(format!(
                        "RON: {}: {err}",
                        server_file.display(),
                    )));
                }
            },
            Err(err) => match err.kind() {
                ErrorKind::NotFound => {}
                _ => return Err(anyhow::Error::msg(err.to_string())),
            },
        }

        let archived_file = data_file(ARCHIVED_TOURNAMENTS_FILE);
        match fs::read_to_string(&archived_file) {
            Ok(archived_string) => {
                let mut archived_tournaments = Vec::new();

                for line in archived_string.lines() {
                    let archived: ArchivedTournament = match ron::from_str(line) {
                        Ok(archived) => archived,
                        Err(err) => {
                            return Err(anyhow::Error::msg(format!(
                                "RON: {}: {err}",
                                archived_file.display(),
                            )));
                        }
                    };
                    archived_tournaments.push(archived);
                }

                self.archived_tournaments = archived_tournaments;
            }
            Err(err) => {
                debug!("archived tournaments file not found: {err}");
            }
        }

        let active_matches_file = data_file(ACTIVE_MATCHES_FILE);
        if fs::exists(&active_matches_file)? {
            let mut file = File::open(active_matches_file)?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;

            let games: Vec<Match> = postcard::from_bytes(data.as_slice())?;
            for game in games {
                self.store.matches.insert(game.id, game);
            }
        }

        ctrlc::set_handler(move || {
            if !systemd {
                println!();
            }
            handle_error(tx.send(("0 server save".to_string(), None)));
            handle_error(tx.send(("0 server exit".to_string(), None)));
        })?;

        Ok(())
    }

    fn login(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
        option_tx: Option<Sender<String>>,
    ) -> Reply {
        let password_1 = the_rest.join(" ");
        let tx = option_tx?;
        if let Some(account) = self.accounts.0.get_mut(username) {
            // The username is in the database and already logged in.
            if let Some(index_database) = account.logged_in {
                info!("{index_supplied} {username} login failed, {index_database} is logged in");

                Some((tx, false, (*command).to_string()))
            // The username is in the database, but not logged in yet.
            } else {
                let hash_2 = PasswordHash::try_from(account.password.as_str()).ok()?;
                if let Err(_error) =
                    Argon2::default().verify_password(password_1.as_bytes(), &hash_2)
                {
                    info!("{index_supplied} {username} provided the wrong password");
                    return Some((tx, false, (*command).to_string()));
                }
                info!("{index_supplied} {username} logged in");

                self.clients.insert(index_supplied, tx);
                account.logged_in = Some(index_supplied);

                Some((self.channel(index_supplied)?, true, (*command).to_string()))
            }
        // The username is not in the database.
        } else {
            info!("{index_supplied} {username} is not in the database");
            Some((tx, false, (*command).to_string()))
        }
    }

    fn logout(&mut self, username: &str, index_supplied: usize, command: &str) -> Reply {
        if let Some(account) = self.accounts.0.get_mut(username)
            && let Some(index_database) = account.logged_in
            && index_database == index_supplied
        {
            info!("{index_supplied} {username} logged out");
            account.logged_in = None;

            self.channel(index_supplied)?
                .send("= logout".to_string())
                .ok()?;

            self.clients.remove(&index_database);

            return None;
        }

        self.clients
            .get(&index_supplied)
            .map(|sender| (sender.clone(), false, (*command).to_string()))
    }

    /// ```sh
    /// <- new_tournament summer-cup solo 100 900 1000 2 8 cancel 2026-09-01 [(position:1,amount:600),(position:2,amount:300)]
    /// -> = new_tournament 1
    /// ```
    fn new_tournament(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        let channel = self.channel(index_supplied)?;

        if the_rest.len() < 9 {
            return Some((channel, false, (*command).to_string()));
        }

        let name = the_rest.first()?;

        let Some(Ok(kind)) = the_rest.get(1).map(|kind| Kind::from_str(kind)) else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(entry_fee)) = the_rest.get(2).map(|fee| fee.parse::<Coins>()) else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(prize_pool)) = the_rest.get(3).map(|pool| pool.parse::<Coins>()) else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(platform_fee_bps)) = the_rest.get(4).map(|bps| bps.parse::<u16>()) else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(min_participants)) = the_rest.get(5).map(|min| min.parse::<usize>()) else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(max_participants)) = the_rest.get(6).map(|max| max.parse::<usize>()) else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(close_policy)) = the_rest.get(7).map(|policy| ClosePolicy::from_str(policy))
        else {
            return Some((channel, false, (*command).to_string()));
        };
        let Some(Ok(deadline)) = the_rest.get(8).map(|date| parse_date(date)) else {
            return Some((channel, false, (*command).to_string()));
        };

        let payouts: Vec<Payout> = match the_rest.get(9) {
            Some(ron_payouts) => match ron::from_str(ron_payouts) {
                Ok(payouts) => payouts,
                Err(_) => return Some((channel, false, (*command).to_string())),
            },
            None => Vec::new(),
        };

        info!("{index_supplied} {username} new_tournament {name}");

        let caps = self.capabilities_for(username);
        let tournament = Tournament {
            name: (*name).to_string(),
            host: username.to_string(),
            kind,
            entry_fee,
            prize_pool,
            payouts,
            platform_fee_bps,
            min_participants,
            max_participants,
            deadline,
            close_policy,
            ..Tournament::default()
        };

        Self::respond(
            channel,
            command,
            self.store
                .create_tournament(&caps, tournament)
                .map(|id| id.to_string()),
        )
    }

    fn resolve_match(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        let channel = self.channel(index_supplied)?;
        let (Some(Ok(id)), Some(winner)) = (
            the_rest.first().map(|id| id.parse::<Id>()),
            the_rest.get(1),
        ) else {
            return Some((channel, false, (*command).to_string()));
        };

        let scores = match (the_rest.get(2), the_rest.get(3)) {
            (Some(a), Some(b)) => {
                let (Ok(a), Ok(b)) = (a.parse::<u32>(), b.parse::<u32>()) else {
                    return Some((channel, false, (*command).to_string()));
                };
                Some((a, b))
            }
            _ => None,
        };

        info!("{index_supplied} {username} resolve_match {id} {winner}");
        let caps = self.capabilities_for(username);
        Self::respond(
            channel,
            command,
            self.store
                .resolve_match(&caps, id, winner, scores)
                .map(|()| String::new()),
        )
    }

    fn save(tx: Sender<(String, Option<Sender<String>>)>) {
        thread::spawn(move || {
            loop {
                thread::sleep(Duration::from_secs(HOUR_IN_SECONDS));
                handle_error(tx.send(("0 server save".to_string(), None)));
            }
        });
    }

    fn save_server(&self) {
        if !self.skip_the_data_files {
            let mut server = self.clone();

            for account in server.accounts.0.values_mut() {
                account.logged_in = None;
            }

            match ron::ser::to_string_pretty(&server, ron::ser::PrettyConfig::default()) {
                Ok(string) => {
                    if !string.trim().is_empty() {
                        let server_file = data_file(SERVER_FILE);

                        match File::create(&server_file) {
                            Ok(mut file) => {
                                if let Err(error) = file.write_all(string.as_bytes()) {
                                    error!("save file (3): {error}");
                                }
                            }
                            Err(error) => error!("save file (2): {error}"),
                        }
                    }
                }
                Err(error) => error!("save file (1): {error}"),
            }
        }
    }

    fn set_role(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        let channel = self.channel(index_supplied)?;

        if !self
            .capabilities_for(username)
            .contains(&Capability::ResolveDisputes)
        {
            return Some((channel, false, (*command).to_string()));
        }

        let (Some(user), Some(Ok(role))) = (
            the_rest.first(),
            the_rest.get(1).map(|role| Role::from_str(role)),
        ) else {
            return Some((channel, false, (*command).to_string()));
        };

        let Some(account) = self.accounts.0.get_mut(*user) else {
            return Some((channel, false, (*command).to_string()));
        };

        info!("{index_supplied} {username} set_role {user} {role}");
        account.role = role;

        Some((channel, true, format!("{command} {user} {role}")))
    }

    fn submit_score(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        let channel = self.channel(index_supplied)?;
        let (Some(Ok(id)), Some(Ok(score_a)), Some(Ok(score_b))) = (
            the_rest.first().map(|id| id.parse::<Id>()),
            the_rest.get(1).map(|score| score.parse::<u32>()),
            the_rest.get(2).map(|score| score.parse::<u32>()),
        ) else {
            return Some((channel, false, (*command).to_string()));
        };

        info!("{index_supplied} {username} submit_score {id} {score_a} {score_b}");
        let caps = self.capabilities_for(username);
        Self::respond(
            channel,
            command,
            self.store
                .submit_score(username, &caps, id, score_a, score_b)
                .map(|()| String::new()),
        )
    }

    /// Applies registration deadlines: tournaments past their deadline are
    /// closed with the server's authority, and the ones with enough
    /// entrants start their bracket.
    fn sweep(&mut self) {
        let now = Utc::now();
        let due: Vec<(Id, String)> = self
            .store
            .tournaments
            .values()
            .filter(|tournament| {
                tournament.status == TournamentStatus::Upcoming && tournament.deadline < now
            })
            .map(|tournament| (tournament.id, tournament.host.clone()))
            .collect();

        let caps = capabilities(Role::Admin);
        for (id, host) in due {
            match self.store.close_registration(&host, &caps, id) {
                Ok(CloseOutcome::Ready) => {
                    if let Err(error) = self.store.start_bracket(&host, &caps, id) {
                        error!("sweep: start_bracket {id}: {error}");
                    } else {
                        info!("sweep: tournament {id} started");
                    }
                }
                Ok(outcome) => info!("sweep: tournament {id} {outcome}"),
                Err(error) => error!("sweep: close_registration {id}: {error}"),
            }
        }
    }

    fn sweep_deadlines(tx: Sender<(String, Option<Sender<String>>)>) {
        thread::spawn(move || {
            handle_error(tx.send(("0 server sweep".to_string(), None)));

            loop {
                thread::sleep(Duration::from_secs(HOUR_IN_SECONDS));
                handle_error(tx.send(("0 server sweep".to_string(), None)));
            }
        });
    }

    fn wallet_adjust(
        &mut self,
        username: &str,
        index_supplied: usize,
        command: &str,
        the_rest: &[&str],
    ) -> Reply {
        let channel = self.channel(index_supplied)?;
        let (Some(user), Some(Ok(amount))) = (
            the_rest.first(),
            the_rest.get(1).map(|amount| amount.parse::<Coins>()),
        ) else {
            return Some((channel, false, (*command).to_string()));
        };

        let direction = if command == "wallet_credit" {
            Direction::Credit
        } else {
            Direction::Debit
        };

        info!("{index_supplied} {username} {command} {user} {amount}");
        let caps = self.capabilities_for(username);
        Self::respond(
            channel,
            command,
            self.store
                .manual_adjust(&caps, user, direction, amount)
                .map(|id| id.to_string()),
        )
    }
}
