//! Account ledger plus the global nullifier and commitment sets.
//!
//! Blocks are applied strictly in height order, one at a time, through
//! [`BlockchainState::apply_block`]. Every transaction in the block is
//! re-validated against the state as of its position in the block, and the
//! block commits as a unit or not at all.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use veil_codec::{block_hash, merkle_root};
use veil_crypto::{PresenceProofVerifier, ProofVerifier};
use veil_types::{
    short_hex, AccountState, Address, Block, Commitment, Hash32, LedgerTx, Nullifier,
};

mod error;
mod overlay;

pub use error::{StateError, TxError};
pub use overlay::{BlockOverlay, StagedChanges};

pub struct BlockchainState {
    accounts: HashMap<Address, AccountState>,
    /// Height of the last applied block; 0 before genesis.
    height: u64,
    last_block_hash: Option<Hash32>,
    /// Append-only.
    nullifier_set: HashSet<Nullifier>,
    /// Append-only.
    commitment_set: HashSet<Commitment>,
    proof_verifier: Arc<dyn ProofVerifier>,
}

impl Default for BlockchainState {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockchainState {
    /// Empty ledger using [`PresenceProofVerifier`] for shielded proofs.
    pub fn new() -> Self {
        Self::with_proof_verifier(Arc::new(PresenceProofVerifier))
    }

    pub fn with_proof_verifier(proof_verifier: Arc<dyn ProofVerifier>) -> Self {
        Self {
            accounts: HashMap::new(),
            height: 0,
            last_block_hash: None,
            nullifier_set: HashSet::new(),
            commitment_set: HashSet::new(),
            proof_verifier,
        }
    }

    /// Ledger pre-funded with the given balances.
    pub fn from_genesis(allocations: impl IntoIterator<Item = (Address, u64)>) -> Self {
        let mut state = Self::new();
        for (address, balance) in allocations {
            state.accounts.insert(
                address,
                AccountState {
                    address,
                    balance,
                    nonce: 0,
                },
            );
        }
        state
    }

    /// Set an account balance before the first block. Refused afterwards.
    pub fn allocate_genesis(&mut self, address: Address, balance: u64) -> Result<(), StateError> {
        if self.height != 0 {
            return Err(StateError::GenesisClosed {
                height: self.height,
            });
        }
        self.accounts
            .entry(address)
            .or_insert_with(|| AccountState::new(address))
            .balance = balance;
        Ok(())
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn last_block_hash(&self) -> Option<Hash32> {
        self.last_block_hash
    }

    /// Account state; unknown addresses read as a fresh zeroed account.
    pub fn account(&self, address: &Address) -> AccountState {
        self.accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| AccountState::new(*address))
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |a| a.balance)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map_or(0, |a| a.nonce)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_nullifier_spent(&self, nullifier: &Nullifier) -> bool {
        self.nullifier_set.contains(nullifier)
    }

    pub fn has_commitment(&self, commitment: &Commitment) -> bool {
        self.commitment_set.contains(commitment)
    }

    pub fn nullifier_count(&self) -> usize {
        self.nullifier_set.len()
    }

    pub fn commitment_count(&self) -> usize {
        self.commitment_set.len()
    }

    pub fn proof_verifier(&self) -> &dyn ProofVerifier {
        self.proof_verifier.as_ref()
    }

    /// Speculative view over the committed state, e.g. for a proposer
    /// filtering pending transactions.
    pub fn overlay(&self) -> BlockOverlay<'_> {
        BlockOverlay::new(self)
    }

    /// Policy check against committed state. No mutation.
    pub fn validate_transaction(&self, tx: &LedgerTx) -> Result<(), TxError> {
        self.overlay().validate(tx)
    }

    /// Validate and apply a single transaction outside of a block.
    pub fn apply_transaction(&mut self, tx: &LedgerTx) -> Result<(), TxError> {
        let mut overlay = self.overlay();
        overlay.try_stage(tx)?;
        let changes = overlay.into_changes();
        self.commit(changes);
        Ok(())
    }

    /// Check that `block` would apply as the next block, without applying it.
    pub fn check_block(&self, block: &Block) -> Result<(), StateError> {
        self.stage_block(block).map(|_| ())
    }

    /// Apply the next block. On any error the state is left untouched.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), StateError> {
        let changes = self.stage_block(block)?;
        self.commit(changes);

        let hash = block_hash(&block.header);
        self.height = block.header.height;
        self.last_block_hash = Some(hash);

        info!(
            height = self.height,
            block_hash = %short_hex(&hash),
            txs = block.transactions.len(),
            "applied block"
        );
        Ok(())
    }

    fn stage_block(&self, block: &Block) -> Result<StagedChanges, StateError> {
        let expected = self.height + 1;
        if block.header.height != expected {
            warn!(expected, got = block.header.height, "rejecting block: bad height");
            return Err(StateError::InvalidHeight {
                expected,
                got: block.header.height,
            });
        }

        if let Some(tip) = self.last_block_hash {
            if block.header.previous_hash != tip {
                warn!(
                    height = block.header.height,
                    tip = %short_hex(&tip),
                    "rejecting block: previous hash does not match tip"
                );
                return Err(StateError::InvalidChain {
                    expected: tip,
                    got: block.header.previous_hash,
                });
            }
        }

        let root = merkle_root(&block.transactions);
        if root != block.header.merkle_root {
            warn!(
                height = block.header.height,
                "rejecting block: merkle root does not cover its transactions"
            );
            return Err(StateError::MerkleMismatch {
                expected: root,
                got: block.header.merkle_root,
            });
        }

        let mut overlay = self.overlay();
        for (index, tx) in block.transactions.iter().enumerate() {
            if let Err(source) = overlay.try_stage(tx) {
                warn!(
                    height = block.header.height,
                    index,
                    error = %source,
                    "rejecting block: invalid transaction"
                );
                return Err(StateError::InvalidTransaction { index, source });
            }
            debug!(
                height = block.header.height,
                index,
                shielded = tx.is_shielded(),
                "staged tx"
            );
        }
        Ok(overlay.into_changes())
    }

    fn commit(&mut self, changes: StagedChanges) {
        self.accounts.extend(changes.accounts);
        self.nullifier_set.extend(changes.nullifiers);
        self.commitment_set.extend(changes.commitments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use veil_codec::{create_block_at, create_transaction_at};
    use veil_types::{ShieldedTransaction, ZERO_HASH};

    const ALICE: Address = [0xA1u8; 20];
    const BOB: Address = [0xB0u8; 20];

    fn transfer(from: Address, to: Address, amount: u64, nonce: u64) -> LedgerTx {
        create_transaction_at(from, to, amount, nonce, 1_000).into()
    }

    fn shielded(nullifier: u8, commitment: u8) -> LedgerTx {
        ShieldedTransaction {
            nullifiers: vec![[nullifier; 32]],
            commitments: vec![[commitment; 32]],
            encrypted_payloads: vec![vec![0u8; 40]],
            proof: vec![1],
        }
        .into()
    }

    #[test]
    fn exact_balance_spend_leaves_zero() {
        let mut state = BlockchainState::from_genesis([(ALICE, 100)]);
        state.apply_transaction(&transfer(ALICE, BOB, 100, 0)).unwrap();
        assert_eq!(state.balance(&ALICE), 0);
        assert_eq!(state.balance(&BOB), 100);
        assert_eq!(state.nonce(&ALICE), 1);
    }

    #[test]
    fn one_short_is_insufficient_and_changes_nothing() {
        let mut state = BlockchainState::from_genesis([(ALICE, 99)]);
        let err = state.apply_transaction(&transfer(ALICE, BOB, 100, 0)).unwrap_err();
        assert_eq!(
            err,
            TxError::InsufficientFunds {
                balance: 99,
                amount: 100
            }
        );
        assert_eq!(state.balance(&ALICE), 99);
        assert_eq!(state.balance(&BOB), 0);
        assert_eq!(state.nonce(&ALICE), 0);
    }

    #[test]
    fn nonce_must_match_exactly() {
        let state = BlockchainState::from_genesis([(ALICE, 10)]);
        assert_eq!(
            state.validate_transaction(&transfer(ALICE, BOB, 1, 1)),
            Err(TxError::NonceMismatch {
                expected: 0,
                got: 1
            })
        );
    }

    #[test]
    fn self_transfer_consumes_nonce() {
        let mut state = BlockchainState::from_genesis([(ALICE, 50)]);
        state.apply_transaction(&transfer(ALICE, ALICE, 20, 0)).unwrap();
        assert_eq!(state.balance(&ALICE), 50);
        assert_eq!(state.nonce(&ALICE), 1);
    }

    #[test]
    fn recipient_overflow_rejected() {
        let mut state = BlockchainState::from_genesis([(ALICE, 10), (BOB, u64::MAX)]);
        assert_eq!(
            state.apply_transaction(&transfer(ALICE, BOB, 1, 0)),
            Err(TxError::BalanceOverflow)
        );
    }

    #[test]
    fn shielded_updates_sets_without_touching_balances() {
        let mut state = BlockchainState::new();
        state.apply_transaction(&shielded(1, 2)).unwrap();
        assert!(state.is_nullifier_spent(&[1u8; 32]));
        assert!(state.has_commitment(&[2u8; 32]));
        assert_eq!(state.account_count(), 0);

        assert_eq!(
            state.validate_transaction(&shielded(1, 3)),
            Err(TxError::DoubleSpend([1u8; 32]))
        );
    }

    #[test]
    fn shielded_structure_and_proof_checked() {
        let state = BlockchainState::new();

        let mut missing_proof = shielded(1, 2);
        if let LedgerTx::Shielded(tx) = &mut missing_proof {
            tx.proof.clear();
        }
        assert_eq!(
            state.validate_transaction(&missing_proof),
            Err(TxError::InvalidProof)
        );

        let malformed: LedgerTx = ShieldedTransaction {
            nullifiers: vec![],
            commitments: vec![[1u8; 32]],
            encrypted_payloads: vec![],
            proof: vec![1],
        }
        .into();
        assert_eq!(
            state.validate_transaction(&malformed),
            Err(TxError::MalformedShielded {
                commitments: 1,
                payloads: 0
            })
        );

        let duplicated: LedgerTx = ShieldedTransaction {
            nullifiers: vec![[7u8; 32], [7u8; 32]],
            commitments: vec![],
            encrypted_payloads: vec![],
            proof: vec![1],
        }
        .into();
        assert_eq!(
            state.validate_transaction(&duplicated),
            Err(TxError::DuplicateNullifier([7u8; 32]))
        );
    }

    #[test]
    fn later_tx_sees_earlier_effects_within_block() {
        let mut state = BlockchainState::from_genesis([(ALICE, 100)]);
        let block = create_block_at(
            1,
            ZERO_HASH,
            vec![
                transfer(ALICE, BOB, 60, 0),
                transfer(BOB, ALICE, 10, 0),
                transfer(ALICE, BOB, 50, 1),
            ],
            ALICE,
            1,
        );
        state.apply_block(&block).unwrap();
        assert_eq!(state.balance(&ALICE), 0);
        assert_eq!(state.balance(&BOB), 100);
    }

    #[test]
    fn failing_tx_rolls_back_whole_block() {
        let mut state = BlockchainState::from_genesis([(ALICE, 100)]);
        let block = create_block_at(
            1,
            ZERO_HASH,
            vec![
                transfer(ALICE, BOB, 60, 0),
                shielded(4, 5),
                transfer(ALICE, BOB, 60, 1),
            ],
            ALICE,
            1,
        );

        let err = state.apply_block(&block).unwrap_err();
        assert!(matches!(
            err,
            StateError::InvalidTransaction {
                index: 2,
                source: TxError::InsufficientFunds { .. }
            }
        ));
        assert_eq!(state.height(), 0);
        assert_eq!(state.last_block_hash(), None);
        assert_eq!(state.balance(&ALICE), 100);
        assert_eq!(state.nonce(&ALICE), 0);
        assert!(!state.is_nullifier_spent(&[4u8; 32]));
        assert!(!state.has_commitment(&[5u8; 32]));
    }

    #[test]
    fn same_nullifier_twice_in_one_block_rejected() {
        let mut state = BlockchainState::new();
        let block = create_block_at(1, ZERO_HASH, vec![shielded(9, 1), shielded(9, 2)], ALICE, 1);
        let err = state.apply_block(&block).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransaction {
                index: 1,
                source: TxError::DoubleSpend([9u8; 32])
            }
        );
        assert_eq!(state.nullifier_count(), 0);
    }

    #[test]
    fn swapped_transactions_fail_merkle_check() {
        let mut state = BlockchainState::from_genesis([(ALICE, 100)]);
        let mut block = create_block_at(1, ZERO_HASH, vec![transfer(ALICE, BOB, 10, 0)], ALICE, 1);
        let committed_root = block.header.merkle_root;
        block.transactions = vec![transfer(ALICE, BOB, 90, 0)];

        let err = state.apply_block(&block).unwrap_err();
        assert_eq!(
            err,
            StateError::MerkleMismatch {
                expected: merkle_root(&block.transactions),
                got: committed_root
            }
        );
        assert_eq!(state.height(), 0);
        assert_eq!(state.balance(&ALICE), 100);
    }

    #[test]
    fn check_block_does_not_apply() {
        let mut state = BlockchainState::from_genesis([(ALICE, 100)]);
        let good = create_block_at(1, ZERO_HASH, vec![transfer(ALICE, BOB, 10, 0)], ALICE, 1);
        let bad = create_block_at(1, ZERO_HASH, vec![transfer(ALICE, BOB, 500, 0)], ALICE, 1);

        state.check_block(&good).unwrap();
        assert!(matches!(
            state.check_block(&bad),
            Err(StateError::InvalidTransaction { index: 0, .. })
        ));
        assert_eq!(state.height(), 0);
        assert_eq!(state.balance(&BOB), 0);

        state.apply_block(&good).unwrap();
        assert_eq!(state.balance(&BOB), 10);
    }

    #[test]
    fn genesis_closes_after_first_block() {
        let mut state = BlockchainState::new();
        state.allocate_genesis(ALICE, 5).unwrap();
        assert_eq!(state.balance(&ALICE), 5);

        let block = create_block_at(1, ZERO_HASH, vec![], ALICE, 1);
        state.apply_block(&block).unwrap();
        assert_eq!(
            state.allocate_genesis(BOB, 1),
            Err(StateError::GenesisClosed { height: 1 })
        );
    }
}
