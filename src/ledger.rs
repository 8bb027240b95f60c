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

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    Coins, Id,
    counter::{Category, Counters},
    error::CoreError,
    wallet::{Wallet, Wallets},
};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    Credit,
    Debit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credit => write!(f, "credit"),
            Self::Debit => write!(f, "debit"),
        }
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a Direction!"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Source {
    Deposit,
    EntryFee,
    HostEarning,
    Manual,
    Refund,
    Winning,
    Withdrawal,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::EntryFee => write!(f, "entry-fee"),
            Self::HostEarning => write!(f, "host-earning"),
            Self::Manual => write!(f, "manual"),
            Self::Refund => write!(f, "refund"),
            Self::Winning => write!(f, "winning"),
            Self::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "deposit" => Ok(Self::Deposit),
            "entry-fee" => Ok(Self::EntryFee),
            "host-earning" => Ok(Self::HostEarning),
            "manual" => Ok(Self::Manual),
            "refund" => Ok(Self::Refund),
            "winning" => Ok(Self::Winning),
            "withdrawal" => Ok(Self::Withdrawal),
            _ => Err(anyhow::Error::msg(format!(
                "Error trying to convert '{string}' to a Source!"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum TransactionStatus {
    Pending,
    #[default]
    Completed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// An immutable ledger entry. Only a withdrawal ever changes after being
/// written, and only its status and balance snapshot, when it is approved.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Id,
    pub username: String,
    pub direction: Direction,
    pub source: Source,
    /// Signed: negative for debits.
    pub amount: Coins,
    pub balance_after: Coins,
    #[serde(default)]
    pub tournament: Option<Id>,
    #[serde(default)]
    pub status: TransactionStatus,
    pub created_at: i64,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.id, self.username, self.direction, self.source, self.amount, self.status
        )
    }
}

/// Owns all money movement: the wallets and their append-only audit trail.
/// Every balance change goes through exactly one `credit` or `debit` call,
/// which also appends the matching transaction row. The ledger provides no
/// deduplication; a retried call produces a second row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Ledger {
    #[serde(default)]
    pub wallets: Wallets,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Ledger {
    /// Creates a zero balance wallet for a new account. A no-op when one
    /// already exists, wallets are never recreated or deleted.
    pub fn open_wallet(&mut self, username: &str) {
        self.wallets
            .0
            .entry(username.to_string())
            .or_insert_with(Wallet::default);
    }

    /// # Errors
    ///
    /// `WalletNotFound` if no wallet exists for the user.
    pub fn wallet(&self, username: &str) -> Result<Wallet, CoreError> {
        self.wallets
            .0
            .get(username)
            .copied()
            .ok_or_else(|| CoreError::WalletNotFound(username.to_string()))
    }

    fn wallet_mut(&mut self, username: &str) -> Result<&mut Wallet, CoreError> {
        self.wallets
            .0
            .get_mut(username)
            .ok_or_else(|| CoreError::WalletNotFound(username.to_string()))
    }

    /// # Errors
    ///
    /// `InvalidAmount` if `amount` is not positive, `WalletNotFound` if no
    /// wallet exists.
    pub fn credit(
        &mut self,
        counters: &mut Counters,
        username: &str,
        amount: Coins,
        source: Source,
        tournament: Option<Id>,
    ) -> Result<Id, CoreError> {
        if amount <= 0 {
            return Err(CoreError::InvalidAmount);
        }

        let wallet = self.wallet_mut(username)?;
        wallet.balance += amount;
        let balance_after = wallet.balance;

        let id = counters.next(Category::Transaction);
        self.transactions.push(Transaction {
            id,
            username: username.to_string(),
            direction: Direction::Credit,
            source,
            amount,
            balance_after,
            tournament,
            status: TransactionStatus::Completed,
            created_at: Utc::now().timestamp(),
        });

        Ok(id)
    }

    /// # Errors
    ///
    /// `InvalidAmount` if `amount` is not positive, `WalletNotFound` if no
    /// wallet exists, `InsufficientBalance` if the balance cannot cover it.
    pub fn debit(
        &mut self,
        counters: &mut Counters,
        username: &str,
        amount: Coins,
        source: Source,
        tournament: Option<Id>,
    ) -> Result<Id, CoreError> {
        if amount <= 0 {
            return Err(CoreError::InvalidAmount);
        }

        let wallet = self.wallet_mut(username)?;
        if wallet.balance < amount {
            return Err(CoreError::InsufficientBalance);
        }

        wallet.balance -= amount;
        let balance_after = wallet.balance;

        let id = counters.next(Category::Transaction);
        self.transactions.push(Transaction {
            id,
            username: username.to_string(),
            direction: Direction::Debit,
            source,
            amount: -amount,
            balance_after,
            tournament,
            status: TransactionStatus::Completed,
            created_at: Utc::now().timestamp(),
        });

        Ok(id)
    }

    /// Reserves part of the balance without moving it. No transaction row
    /// is written, only credits and debits move money.
    ///
    /// # Errors
    ///
    /// `InvalidAmount`, `WalletNotFound`, or `InsufficientAvailableBalance`
    /// if `balance - locked < amount`.
    pub fn lock(&mut self, username: &str, amount: Coins) -> Result<(), CoreError> {
        if amount <= 0 {
            return Err(CoreError::InvalidAmount);
        }

        let wallet = self.wallet_mut(username)?;
        if wallet.available() < amount {
            return Err(CoreError::InsufficientAvailableBalance);
        }

        wallet.locked += amount;
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidAmount`, `WalletNotFound`, or `InsufficientAvailableBalance`
    /// if less than `amount` is locked.
    pub fn unlock(&mut self, username: &str, amount: Coins) -> Result<(), CoreError> {
        if amount <= 0 {
            return Err(CoreError::InvalidAmount);
        }

        let wallet = self.wallet_mut(username)?;
        if wallet.locked < amount {
            return Err(CoreError::InsufficientAvailableBalance);
        }

        wallet.locked -= amount;
        Ok(())
    }

    /// Locks the amount and writes a `Pending` withdrawal debit in one
    /// step. The balance itself is untouched until approval.
    ///
    /// # Errors
    ///
    /// Same as [`Self::lock`].
    pub fn request_withdrawal(
        &mut self,
        counters: &mut Counters,
        username: &str,
        amount: Coins,
    ) -> Result<Id, CoreError> {
        self.lock(username, amount)?;

        let balance_after = self.wallet(username)?.balance;
        let id = counters.next(Category::Transaction);
        self.transactions.push(Transaction {
            id,
            username: username.to_string(),
            direction: Direction::Debit,
            source: Source::Withdrawal,
            amount: -amount,
            balance_after,
            tournament: None,
            status: TransactionStatus::Pending,
            created_at: Utc::now().timestamp(),
        });

        Ok(id)
    }

    /// Reduces balance and locked by the withdrawn amount and flips the
    /// pending transaction to `Completed`.
    ///
    /// # Errors
    ///
    /// `TransactionNotFound` if `id` is not a pending withdrawal of this
    /// user, `InsufficientBalance` / `InsufficientAvailableBalance` if the
    /// wallet can no longer cover it.
    pub fn approve_withdrawal(&mut self, username: &str, id: Id) -> Result<(), CoreError> {
        let index = self
            .transactions
            .iter()
            .position(|transaction| {
                transaction.id == id
                    && transaction.username == username
                    && transaction.source == Source::Withdrawal
                    && transaction.status == TransactionStatus::Pending
            })
            .ok_or(CoreError::TransactionNotFound(id))?;

        let amount = -self.transactions[index].amount;

        let wallet = self.wallet_mut(username)?;
        if wallet.balance < amount {
            return Err(CoreError::InsufficientBalance);
        }
        if wallet.locked < amount {
            return Err(CoreError::InsufficientAvailableBalance);
        }

        wallet.balance -= amount;
        wallet.locked -= amount;
        let balance_after = wallet.balance;

        let Some(transaction) = self.transactions.get_mut(index) else {
            return Err(CoreError::TransactionNotFound(id));
        };
        transaction.status = TransactionStatus::Completed;
        transaction.balance_after = balance_after;

        Ok(())
    }

    pub fn pending_withdrawals(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|transaction| {
            transaction.source == Source::Withdrawal
                && transaction.status == TransactionStatus::Pending
        })
    }

    pub fn history(&self, username: &str) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(move |transaction| transaction.username == username)
    }

    /// The balance reconstructed from the completed entries alone. Always
    /// equal to the wallet's stored balance.
    #[must_use]
    pub fn replay(&self, username: &str) -> Coins {
        self.history(username)
            .filter(|transaction| transaction.status == TransactionStatus::Completed)
            .map(|transaction| transaction.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(username: &str, balance: Coins) -> (Ledger, Counters) {
        let mut ledger = Ledger::default();
        let mut counters = Counters::default();

        ledger.open_wallet(username);
        ledger
            .credit(&mut counters, username, balance, Source::Deposit, None)
            .unwrap();

        (ledger, counters)
    }

    #[test]
    fn credit_and_debit_validate_the_amount() {
        let (mut ledger, mut counters) = funded("ingrid", 100);

        for amount in [0, -5] {
            assert_eq!(
                ledger.credit(&mut counters, "ingrid", amount, Source::Deposit, None),
                Err(CoreError::InvalidAmount)
            );
            assert_eq!(
                ledger.debit(&mut counters, "ingrid", amount, Source::Manual, None),
                Err(CoreError::InvalidAmount)
            );
        }

        // only the funding credit was written
        assert_eq!(ledger.transactions.len(), 1);
    }

    #[test]
    fn debit_needs_a_wallet_and_a_balance() {
        let (mut ledger, mut counters) = funded("ingrid", 100);

        assert_eq!(
            ledger.debit(&mut counters, "nobody", 10, Source::Manual, None),
            Err(CoreError::WalletNotFound("nobody".to_string()))
        );
        assert_eq!(
            ledger.debit(&mut counters, "ingrid", 101, Source::Manual, None),
            Err(CoreError::InsufficientBalance)
        );

        assert_eq!(ledger.wallet("ingrid").unwrap().balance, 100);
        assert_eq!(ledger.transactions.len(), 1);

        ledger
            .debit(&mut counters, "ingrid", 40, Source::Manual, None)
            .unwrap();
        assert_eq!(ledger.wallet("ingrid").unwrap().balance, 60);
    }

    #[test]
    fn locking_respects_the_available_balance() {
        let (mut ledger, _counters) = funded("sigrid", 1_000);

        ledger.lock("sigrid", 200).unwrap();
        assert_eq!(
            ledger.lock("sigrid", 900),
            Err(CoreError::InsufficientAvailableBalance)
        );

        ledger.lock("sigrid", 800).unwrap();
        let wallet = ledger.wallet("sigrid").unwrap();
        assert_eq!(wallet.balance, 1_000);
        assert_eq!(wallet.locked, 1_000);
        assert_eq!(wallet.available(), 0);
    }

    #[test]
    fn withdrawal_locks_then_settles() {
        let (mut ledger, mut counters) = funded("olaf", 500);

        let id = ledger
            .request_withdrawal(&mut counters, "olaf", 300)
            .unwrap();

        let wallet = ledger.wallet("olaf").unwrap();
        assert_eq!(wallet.balance, 500);
        assert_eq!(wallet.locked, 300);
        assert_eq!(ledger.pending_withdrawals().count(), 1);
        // the pending debit is not part of the balance yet
        assert_eq!(ledger.replay("olaf"), 500);

        ledger.approve_withdrawal("olaf", id).unwrap();

        let wallet = ledger.wallet("olaf").unwrap();
        assert_eq!(wallet.balance, 200);
        assert_eq!(wallet.locked, 0);
        assert_eq!(ledger.pending_withdrawals().count(), 0);
        assert_eq!(ledger.replay("olaf"), 200);

        assert_eq!(
            ledger.approve_withdrawal("olaf", id),
            Err(CoreError::TransactionNotFound(id))
        );
    }

    #[test]
    fn the_history_replays_to_the_balance() {
        let (mut ledger, mut counters) = funded("astrid", 1_000);

        ledger
            .debit(&mut counters, "astrid", 250, Source::EntryFee, Some(1))
            .unwrap();
        ledger
            .credit(&mut counters, "astrid", 250, Source::Refund, Some(1))
            .unwrap();
        ledger
            .debit(&mut counters, "astrid", 100, Source::EntryFee, Some(2))
            .unwrap();
        ledger
            .credit(&mut counters, "astrid", 600, Source::Winning, Some(2))
            .unwrap();

        let wallet = ledger.wallet("astrid").unwrap();
        assert_eq!(wallet.balance, 1_500);
        assert_eq!(ledger.replay("astrid"), wallet.balance);
        assert!(wallet.locked >= 0 && wallet.locked <= wallet.balance);

        for transaction in ledger.history("astrid") {
            match transaction.direction {
                Direction::Credit => assert!(transaction.amount > 0),
                Direction::Debit => assert!(transaction.amount < 0),
            }
        }
    }
}
