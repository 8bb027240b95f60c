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

use serde::{Deserialize, Serialize};

use crate::Coins;

/// One wallet per account. `locked` is the portion of the balance reserved
/// for pending withdrawals; it never exceeds `balance`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Wallet {
    #[serde(default)]
    pub balance: Coins,
    #[serde(default)]
    pub locked: Coins,
}

impl Wallet {
    #[must_use]
    pub fn available(&self) -> Coins {
        self.balance - self.locked
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.balance, self.locked)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Wallets(pub HashMap<String, Wallet>);

impl fmt::Display for Wallets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wallets = Vec::new();
        for (name, wallet) in &self.0 {
            wallets.push(format!("{name} {wallet}"));
        }
        wallets.sort_unstable();
        let wallets = wallets.join(" ");

        write!(f, "{wallets}")
    }
}
