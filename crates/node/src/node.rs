//! Wiring of consensus, ledger state and mempool inside one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use veil_codec::create_block;
use veil_consensus::{BftConsensus, ConsensusError, ConsensusRound, Validator, VoteOutcome};
use veil_crypto::Keypair;
use veil_mempool::Mempool;
use veil_state::{BlockchainState, TxError};
use veil_types::{short_hex, Address, Block, Hash32, LedgerTx, ZERO_HASH};

use crate::{NodeConfig, NodeError};

/// A single-process chain: one consensus engine, one ledger, one mempool and
/// the keys of every validator this process signs for.
///
/// Handles are cheap to clone and share the same underlying chain. Locks are
/// always taken in the order consensus, state, mempool. A finalized block is
/// applied to the ledger while the consensus lock is still held, so blocks
/// reach the ledger exactly once and in height order.
#[derive(Clone)]
pub struct ChainNode {
    consensus: Arc<Mutex<BftConsensus>>,
    state: Arc<RwLock<BlockchainState>>,
    mempool: Arc<Mutex<Mempool>>,
    keys: Arc<HashMap<Address, Keypair>>,
    max_block_txs: usize,
}

impl ChainNode {
    pub fn new(
        consensus: BftConsensus,
        state: BlockchainState,
        mempool: Mempool,
        keys: Vec<Keypair>,
    ) -> Self {
        let max_block_txs = consensus.config().max_block_txs;
        Self {
            consensus: Arc::new(Mutex::new(consensus)),
            state: Arc::new(RwLock::new(state)),
            mempool: Arc::new(Mutex::new(mempool)),
            keys: Arc::new(keys.into_iter().map(|k| (k.address, k)).collect()),
            max_block_txs,
        }
    }

    /// Build a node hosting every validator listed in `config`.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let scheme = config.scheme.build();

        let mut keys = Vec::with_capacity(config.validators.len());
        let mut validators = Vec::with_capacity(config.validators.len());
        for (secret, stake) in config.validator_secrets()? {
            let keypair = Keypair::from_secret(scheme.as_ref(), secret);
            validators.push(Validator::new(keypair.address, keypair.public, stake));
            keys.push(keypair);
        }

        let consensus = BftConsensus::new(validators, scheme, config.consensus.clone())?;
        let state = BlockchainState::from_genesis(config.genesis_allocations()?);
        info!(
            validators = keys.len(),
            accounts = state.account_count(),
            "node initialised"
        );
        Ok(Self::new(
            consensus,
            state,
            Mempool::new(config.mempool_capacity),
            keys,
        ))
    }

    /// Current consensus (height, round).
    pub fn position(&self) -> (u64, u64) {
        let consensus = self.consensus.lock();
        (consensus.current_height(), consensus.current_round())
    }

    pub fn round_timeout(&self) -> Duration {
        self.consensus.lock().config().round_timeout()
    }

    /// Height of the last block applied to the ledger.
    pub fn height(&self) -> u64 {
        self.state.read().height()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.state.read().balance(address)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.state.read().nonce(address)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn finalized_block(&self, height: u64) -> Option<Block> {
        self.consensus.lock().finalized_block(height).cloned()
    }

    pub fn hosted_validators(&self) -> impl Iterator<Item = &Address> {
        self.keys.keys()
    }

    /// Run `f` against the committed ledger.
    pub fn with_state<R>(&self, f: impl FnOnce(&BlockchainState) -> R) -> R {
        f(&self.state.read())
    }

    /// Run `f` against the consensus engine, e.g. to change stakes.
    pub fn with_consensus<R>(&self, f: impl FnOnce(&mut BftConsensus) -> R) -> R {
        f(&mut self.consensus.lock())
    }

    /// Admit a transaction to the mempool.
    ///
    /// Transparent transfers are only checked for a stale nonce here; balance
    /// and exact ordering are checked when a proposal is assembled. Shielded
    /// transactions are fully validated against committed state.
    pub fn submit_transaction(&self, tx: LedgerTx) -> Result<Hash32, NodeError> {
        {
            let state = self.state.read();
            match &tx {
                LedgerTx::Transparent(t) => {
                    let expected = state.nonce(&t.sender);
                    if t.nonce < expected {
                        return Err(TxError::NonceMismatch {
                            expected,
                            got: t.nonce,
                        }
                        .into());
                    }
                }
                LedgerTx::Shielded(_) => state.validate_transaction(&tx)?,
            }
        }
        let id = self.mempool.lock().insert(tx)?;
        debug!(id = %short_hex(&id), "transaction submitted");
        Ok(id)
    }

    /// Have the current round's proposer propose, if this node hosts it.
    ///
    /// Returns the proposal hash. A round that already has a proposal keeps
    /// it. `None` means there is no proposer or it is hosted elsewhere.
    pub fn propose(&self) -> Result<Option<Hash32>, NodeError> {
        let mut consensus = self.consensus.lock();
        self.propose_locked(&mut consensus)
    }

    fn propose_locked(&self, consensus: &mut BftConsensus) -> Result<Option<Hash32>, NodeError> {
        let Some(round) = consensus.current_round_state() else {
            return Ok(None);
        };
        if let Some(hash) = round.proposed_hash() {
            return Ok(Some(hash));
        }
        let Some(proposer) = round.proposer() else {
            return Ok(None);
        };
        let Some(keys) = self.keys.get(&proposer) else {
            return Ok(None);
        };

        let mut block = self.assemble_block(consensus.current_height(), proposer);
        match consensus.propose_block(&mut block, &proposer, &keys.secret) {
            Ok(hash) => Ok(Some(hash)),
            Err(err) => {
                self.requeue(block.transactions);
                Err(err.into())
            }
        }
    }

    /// Drain the mempool into a block that applies cleanly on top of the
    /// committed state. Transactions waiting on an earlier nonce go back to
    /// the pool; anything else that fails validation is dropped.
    fn assemble_block(&self, height: u64, proposer: Address) -> Block {
        let state = self.state.read();
        let mut mempool = self.mempool.lock();

        let candidates = mempool.drain_ready(self.max_block_txs);
        let mut overlay = state.overlay();
        let mut included = Vec::with_capacity(candidates.len());
        let mut deferred = Vec::new();
        for tx in candidates {
            match overlay.try_stage(&tx) {
                Ok(()) => included.push(tx),
                Err(TxError::NonceMismatch { expected, got }) if got > expected => {
                    deferred.push(tx);
                }
                Err(err) => warn!(height, error = %err, "dropping invalid pending transaction"),
            }
        }
        for tx in deferred {
            if let Err(err) = mempool.insert(tx) {
                debug!(error = %err, "could not defer transaction");
            }
        }

        let previous = state.last_block_hash().unwrap_or(ZERO_HASH);
        create_block(height, previous, included, proposer)
    }

    fn requeue(&self, transactions: Vec<LedgerTx>) {
        let mut mempool = self.mempool.lock();
        for tx in transactions {
            if let Err(err) = mempool.insert(tx) {
                debug!(error = %err, "could not requeue transaction");
            }
        }
    }

    /// Vote for the current proposal as `validator`. A vote that finalizes
    /// the block also applies it to the ledger.
    ///
    /// The proposal must apply cleanly on top of the committed ledger;
    /// otherwise no vote is cast and `InvalidProposal` is returned.
    pub fn vote(&self, validator: &Address) -> Result<VoteOutcome, NodeError> {
        let mut consensus = self.consensus.lock();
        self.vote_locked(&mut consensus, validator)
    }

    fn vote_locked(
        &self,
        consensus: &mut BftConsensus,
        validator: &Address,
    ) -> Result<VoteOutcome, NodeError> {
        let keys = self
            .keys
            .get(validator)
            .ok_or_else(|| NodeError::NotHosted(short_hex(validator)))?;

        let round = consensus
            .current_round_state()
            .ok_or(ConsensusError::NoProposal)?;
        let (Some(hash), Some(proposal)) = (round.proposed_hash(), round.proposed_block()) else {
            return Err(ConsensusError::NoProposal.into());
        };
        if let Err(err) = self.state.read().check_block(proposal) {
            warn!(
                height = proposal.height(),
                voter = %short_hex(validator),
                error = %err,
                "refusing to vote for proposal"
            );
            return Err(NodeError::InvalidProposal(err));
        }

        let outcome = consensus.vote_for_block(validator, hash, &keys.secret)?;
        if let VoteOutcome::Finalized(block) = &outcome {
            self.apply_finalized(block)?;
        }
        Ok(outcome)
    }

    fn apply_finalized(&self, block: &Block) -> Result<(), NodeError> {
        self.state.write().apply_block(block)?;
        let cleared = self.mempool.lock().remove_included(block);
        info!(
            height = block.height(),
            txs = block.transactions.len(),
            cleared,
            "finalized block applied"
        );
        Ok(())
    }

    /// Propose and collect votes from every hosted validator that can still
    /// vote this round. Returns the block if the round finalized.
    ///
    /// Runs under a single consensus lock, so a round timeout cannot move the
    /// round between the proposal and its votes.
    pub fn run_round(&self) -> Result<Option<Block>, NodeError> {
        let mut consensus = self.consensus.lock();
        if self.propose_locked(&mut consensus)?.is_none() {
            return Ok(None);
        }

        let voters: Vec<Address> = {
            let Some(round) = consensus.current_round_state() else {
                return Ok(None);
            };
            round
                .eligible()
                .iter()
                .map(|(address, _)| *address)
                .filter(|a| self.keys.contains_key(a) && !round.has_voted(a))
                .filter(|a| consensus.validator(a).is_some_and(Validator::is_active))
                .collect()
        };

        for voter in voters {
            if let VoteOutcome::Finalized(block) = self.vote_locked(&mut consensus, &voter)? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Move past (`height`, `round`) if it is still current. Transactions of
    /// an abandoned proposal return to the mempool.
    pub fn handle_round_timeout(&self, height: u64, round: u64) -> bool {
        let mut consensus = self.consensus.lock();
        let abandoned = consensus
            .round(height, round)
            .and_then(ConsensusRound::proposed_block)
            .map(|block| block.transactions.clone());
        if !consensus.advance_if_stalled(height, round) {
            return false;
        }
        if let Some(transactions) = abandoned {
            self.requeue(transactions);
        }
        true
    }
}
