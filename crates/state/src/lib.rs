//! Account ledger: the deterministic state-transition function.
//!
//! State is a pure projection of the chain. Replaying the same blocks from
//! [`LedgerState::default`] always yields the same balances and nonces, which
//! is what fork resolution relies on when it rebuilds state from genesis.

use std::collections::HashMap;

use quarry_crypto::verify_tx;
use quarry_types::{Address, Block, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("transaction amount must be positive")]
    InvalidAmount,
    #[error("signature does not verify for sender")]
    InvalidSignature,
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: u64, required: u64 },
    #[error("bad nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },
    #[error("balance overflow")]
    Overflow,
}

/// A block failed while replaying a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("block {height} does not apply: {source}")]
pub struct ReplayError {
    pub height: u64,
    #[source]
    pub source: StateError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    balances: HashMap<Address, u64>,
    /// Transfers applied per sender.
    nonces: HashMap<Address, u64>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state by applying `blocks` in order from empty.
    pub fn from_blocks<'a>(
        blocks: impl IntoIterator<Item = &'a Block>,
    ) -> Result<Self, ReplayError> {
        let mut state = Self::new();
        for block in blocks {
            state.apply_block(block).map_err(|source| ReplayError {
                height: block.index,
                source,
            })?;
        }
        Ok(state)
    }

    pub fn balance(&self, addr: &Address) -> u64 {
        self.balances.get(addr).copied().unwrap_or(0)
    }

    /// Number of transfers `addr` has sent.
    pub fn nonce(&self, addr: &Address) -> u64 {
        self.nonces.get(addr).copied().unwrap_or(0)
    }

    /// The nonce `addr`'s next transfer must carry.
    pub fn next_nonce(&self, addr: &Address) -> u64 {
        self.nonce(addr).saturating_add(1)
    }

    /// A state holding only `addr`'s account. Applying `addr`'s transfers to
    /// it answers what the account would look like without copying the
    /// whole ledger.
    pub fn account(&self, addr: &Address) -> Self {
        let mut view = Self::new();
        if let Some(balance) = self.balances.get(addr) {
            view.balances.insert(*addr, *balance);
        }
        if let Some(nonce) = self.nonces.get(addr) {
            view.nonces.insert(*addr, *nonce);
        }
        view
    }

    pub fn total_supply(&self) -> u128 {
        self.balances.values().map(|b| u128::from(*b)).sum()
    }

    fn credit(&mut self, addr: Address, amount: u64) -> Result<(), StateError> {
        let balance = self.balance(&addr);
        let updated = balance.checked_add(amount).ok_or(StateError::Overflow)?;
        self.balances.insert(addr, updated);
        Ok(())
    }

    /// Apply one transaction. On error the state is untouched.
    ///
    /// A coinbase credits `to` unconditionally. A transfer must verify, carry
    /// exactly [`LedgerState::next_nonce`] and be covered by the sender's
    /// balance (`amount + fee`), checked in that order so a replay is always
    /// `BadNonce`. The fee leaves the sender here; it is
    /// paid to the miner by [`LedgerState::apply_block`].
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), StateError> {
        if tx.amount == 0 {
            return Err(StateError::InvalidAmount);
        }

        let Some(from) = tx.from else {
            return self.credit(tx.to, tx.amount);
        };

        if !matches!(verify_tx(tx), Ok(true)) {
            return Err(StateError::InvalidSignature);
        }

        let expected = self.next_nonce(&from);
        if tx.nonce != expected {
            return Err(StateError::BadNonce {
                expected,
                got: tx.nonce,
            });
        }

        let required = tx.total_debit().ok_or(StateError::Overflow)?;
        let balance = self.balance(&from);
        if balance < required {
            return Err(StateError::InsufficientFunds { balance, required });
        }

        // Work out the recipient's balance before touching anything so an
        // overflow leaves the state as it was.
        let remaining = balance - required;
        let recipient_before = if tx.to == from {
            remaining
        } else {
            self.balance(&tx.to)
        };
        let recipient_after = recipient_before
            .checked_add(tx.amount)
            .ok_or(StateError::Overflow)?;

        self.balances.insert(from, remaining);
        self.balances.insert(tx.to, recipient_after);
        self.nonces.insert(from, tx.nonce);
        Ok(())
    }

    /// Apply every transaction in list order, then pay the block's fees to
    /// the coinbase recipient. All-or-nothing: the first failure leaves the
    /// state as it was.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), StateError> {
        let mut scratch = self.clone();
        for tx in &block.transactions {
            scratch.apply_transaction(tx)?;
        }

        let fees = block.total_fees().ok_or(StateError::Overflow)?;
        if fees > 0 {
            if let Some(coinbase) = block.coinbase() {
                scratch.credit(coinbase.to, fees)?;
            }
        }

        *self = scratch;
        Ok(())
    }
}
