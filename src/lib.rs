//! The wallet ledger, bracket engine and tournament orchestrator behind an
//! e-sports tournament server.
//!
//! ## Feature Flags
//!
//! By default the `server` feature flag is enabled.
//!
//! * server - enable the `arena-server-full` binary
//!
//! ## Message Protocol
//!
//! The server speaks a line based text protocol. A request is a line of
//! whitespace separated words; the reply is `= <command> …` on success and
//! `? <command> <message>` on failure. Structured payloads inside a reply
//! are RON.

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

#![deny(clippy::panic)]

pub mod bracket;
pub mod capability;
pub mod counter;
pub mod error;
pub mod event;
pub mod ledger;
pub mod registration;
pub mod store;
pub mod tournament;
pub mod utils;
pub mod wallet;

pub type Id = u128;

/// Amounts of money in the smallest currency unit.
pub type Coins = i64;

pub const HOME: &str = "esports-arena";
pub const SERVER_PORT: &str = ":49153";
pub const VERSION_ID: &str = "c1f407b2";

pub const COPYRIGHT: &str = r".SH COPYRIGHT
Copyright (C) 2025-2026 Developers of the esports-arena project

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.
";

pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "
Copyright (c) 2025-2026 Developers of the esports-arena project
Licensed under the AGPLv3"
);
