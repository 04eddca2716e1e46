//! Staged ledger changes.
//!
//! A [`BlockOverlay`] reads through to the committed [`BlockchainState`] and
//! records every effect locally. Nothing reaches the committed state until the
//! overlay is turned into [`StagedChanges`] and committed, so a block that
//! fails half-way leaves no trace.

use std::collections::{HashMap, HashSet};

use veil_types::{
    AccountState, Address, Commitment, LedgerTx, Nullifier, ShieldedTransaction, Transaction,
};

use crate::error::TxError;
use crate::BlockchainState;

/// Effects of one or more transactions, ready to commit.
#[derive(Debug, Default)]
pub struct StagedChanges {
    pub(crate) accounts: HashMap<Address, AccountState>,
    pub(crate) nullifiers: HashSet<Nullifier>,
    pub(crate) commitments: HashSet<Commitment>,
}

pub struct BlockOverlay<'a> {
    base: &'a BlockchainState,
    changes: StagedChanges,
}

impl<'a> BlockOverlay<'a> {
    pub(crate) fn new(base: &'a BlockchainState) -> Self {
        Self {
            base,
            changes: StagedChanges::default(),
        }
    }

    /// Account as seen by the next transaction in sequence.
    pub fn account(&self, address: &Address) -> AccountState {
        self.changes
            .accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.base.account(address))
    }

    pub fn is_nullifier_spent(&self, nullifier: &Nullifier) -> bool {
        self.changes.nullifiers.contains(nullifier) || self.base.is_nullifier_spent(nullifier)
    }

    /// Check `tx` against the base state plus everything staged so far.
    pub fn validate(&self, tx: &LedgerTx) -> Result<(), TxError> {
        match tx {
            LedgerTx::Transparent(tx) => self.validate_transparent(tx),
            LedgerTx::Shielded(tx) => self.validate_shielded(tx),
        }
    }

    fn validate_transparent(&self, tx: &Transaction) -> Result<(), TxError> {
        let sender = self.account(&tx.sender);
        if sender.balance < tx.amount {
            return Err(TxError::InsufficientFunds {
                balance: sender.balance,
                amount: tx.amount,
            });
        }
        // strict equality: transactions apply in exact nonce order
        if sender.nonce != tx.nonce {
            return Err(TxError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        if tx.sender != tx.recipient {
            let recipient = self.account(&tx.recipient);
            if recipient.balance.checked_add(tx.amount).is_none() {
                return Err(TxError::BalanceOverflow);
            }
        }
        Ok(())
    }

    fn validate_shielded(&self, tx: &ShieldedTransaction) -> Result<(), TxError> {
        if !tx.is_well_formed() {
            return Err(TxError::MalformedShielded {
                commitments: tx.commitments.len(),
                payloads: tx.encrypted_payloads.len(),
            });
        }

        let mut seen = HashSet::with_capacity(tx.nullifiers.len());
        for nullifier in &tx.nullifiers {
            if self.is_nullifier_spent(nullifier) {
                return Err(TxError::DoubleSpend(*nullifier));
            }
            if !seen.insert(nullifier) {
                return Err(TxError::DuplicateNullifier(*nullifier));
            }
        }

        if !self.base.proof_verifier().verify(tx) {
            return Err(TxError::InvalidProof);
        }
        Ok(())
    }

    /// Record the effects of `tx`. Callers validate first.
    pub fn stage(&mut self, tx: &LedgerTx) {
        match tx {
            LedgerTx::Transparent(tx) => {
                let mut sender = self.account(&tx.sender);
                sender.balance -= tx.amount;
                sender.nonce += 1;
                self.changes.accounts.insert(tx.sender, sender);

                // a self-transfer re-reads the debited sender here: net zero
                let mut recipient = self.account(&tx.recipient);
                recipient.balance += tx.amount;
                self.changes.accounts.insert(tx.recipient, recipient);
            }
            LedgerTx::Shielded(tx) => {
                self.changes.nullifiers.extend(tx.nullifiers.iter().copied());
                self.changes.commitments.extend(tx.commitments.iter().copied());
            }
        }
    }

    /// Validate then stage. On error nothing is staged.
    pub fn try_stage(&mut self, tx: &LedgerTx) -> Result<(), TxError> {
        self.validate(tx)?;
        self.stage(tx);
        Ok(())
    }

    pub fn into_changes(self) -> StagedChanges {
        self.changes
    }
}
