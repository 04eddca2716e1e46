//! Stake-weighted BFT engine: proposer rotation, voting and finalization.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use veil_codec::now_secs;
use veil_crypto::{sign_block, sign_vote, verify_vote, SignatureScheme};
use veil_types::{short_hex, Address, Block, Hash32, SecretKeyBytes, Vote};

use crate::round::ConsensusRound;
use crate::validator::{Validator, ValidatorSet, ValidatorState};
use crate::{ConsensusConfig, ConsensusError, ProposalFault};

/// What happened to an accepted vote.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    /// Counted; the round is still short of its threshold.
    Accepted { voted_stake: u64, threshold: u64 },
    /// Counted and it pushed the round over the threshold.
    Finalized(Block),
}

/// Single-process BFT engine.
///
/// Heights start at 1. Every (height, round) gets a [`ConsensusRound`] when
/// it opens; finalizing a block moves to the next height at round 0.
pub struct BftConsensus {
    validators: ValidatorSet,
    scheme: Arc<dyn SignatureScheme>,
    config: ConsensusConfig,
    current_height: u64,
    current_round: u64,
    rounds: BTreeMap<(u64, u64), ConsensusRound>,
    finalized_blocks: BTreeMap<u64, Block>,
}

impl BftConsensus {
    pub fn new(
        validators: Vec<Validator>,
        scheme: Arc<dyn SignatureScheme>,
        config: ConsensusConfig,
    ) -> Result<Self, ConsensusError> {
        let mut set = ValidatorSet::new();
        for validator in validators {
            set.register(validator)?;
        }

        let mut engine = Self {
            validators: set,
            scheme,
            config,
            current_height: 1,
            current_round: 0,
            rounds: BTreeMap::new(),
            finalized_blocks: BTreeMap::new(),
        };
        engine.open_round();
        Ok(engine)
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn scheme(&self) -> &dyn SignatureScheme {
        self.scheme.as_ref()
    }

    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    pub fn current_round(&self) -> u64 {
        self.current_round
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn validator(&self, address: &Address) -> Option<&Validator> {
        self.validators.get(address)
    }

    /// Add a validator. It becomes eligible from the next round that opens.
    pub fn register_validator(&mut self, validator: Validator) -> Result<(), ConsensusError> {
        info!(
            validator = %short_hex(&validator.address),
            stake = validator.stake,
            "validator registered"
        );
        self.validators.register(validator)
    }

    /// Apply a signed stake delta and return the resulting state.
    pub fn update_stake(
        &mut self,
        address: &Address,
        delta: i64,
    ) -> Result<ValidatorState, ConsensusError> {
        let validator = self
            .validators
            .get_mut(address)
            .ok_or(ConsensusError::UnknownValidator)?;
        validator.update_stake(delta);
        debug!(
            validator = %short_hex(address),
            delta,
            stake = validator.stake,
            state = ?validator.state,
            "stake updated"
        );
        Ok(validator.state)
    }

    pub fn jail(&mut self, address: &Address) -> Result<(), ConsensusError> {
        let validator = self
            .validators
            .get_mut(address)
            .ok_or(ConsensusError::UnknownValidator)?;
        validator.jail();
        warn!(validator = %short_hex(address), "validator jailed");
        Ok(())
    }

    pub fn current_round_state(&self) -> Option<&ConsensusRound> {
        self.rounds.get(&(self.current_height, self.current_round))
    }

    pub fn round(&self, height: u64, round: u64) -> Option<&ConsensusRound> {
        self.rounds.get(&(height, round))
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Selected proposer for the current round, if any validator is active.
    pub fn get_current_proposer(&self) -> Option<&Validator> {
        let address = self.current_round_state()?.proposer()?;
        self.validators.get(&address)
    }

    /// Abandon the current round and open the next one at the same height.
    pub fn start_new_round(&mut self) {
        self.current_round += 1;
        self.open_round();
        debug!(
            height = self.current_height,
            round = self.current_round,
            "round advanced"
        );
    }

    /// Advance only if (`height`, `round`) is still current. Returns whether
    /// a new round was opened.
    pub fn advance_if_stalled(&mut self, height: u64, round: u64) -> bool {
        if (height, round) != (self.current_height, self.current_round) {
            return false;
        }
        warn!(height, round, "round timed out");
        self.start_new_round();
        true
    }

    fn open_round(&mut self) {
        let round = ConsensusRound::new(self.current_height, self.current_round, &self.validators);
        self.rounds
            .insert((self.current_height, self.current_round), round);
    }

    fn current_round_mut(&mut self) -> &mut ConsensusRound {
        let key = (self.current_height, self.current_round);
        let validators = &self.validators;
        self.rounds
            .entry(key)
            .or_insert_with(|| ConsensusRound::new(key.0, key.1, validators))
    }

    /// Sign `block` as `proposer` and record it as the current round's
    /// proposal. Returns the block hash.
    pub fn propose_block(
        &mut self,
        block: &mut Block,
        proposer: &Address,
        signing_key: &SecretKeyBytes,
    ) -> Result<Hash32, ConsensusError> {
        let selected = self
            .current_round_state()
            .and_then(ConsensusRound::proposer)
            .ok_or(ConsensusError::NoActiveValidators)?;
        if selected != *proposer {
            return Err(ConsensusError::InvalidProposer(ProposalFault::NotSelected));
        }
        if block.height() != self.current_height {
            return Err(ConsensusError::InvalidProposer(
                ProposalFault::WrongHeight {
                    expected: self.current_height,
                    got: block.height(),
                },
            ));
        }
        if block.header.validator != *proposer {
            return Err(ConsensusError::InvalidProposer(
                ProposalFault::ValidatorMismatch,
            ));
        }

        let public_key = self
            .validators
            .get(proposer)
            .ok_or(ConsensusError::UnknownValidator)?
            .public_key;
        if self.scheme.public_key(signing_key) != public_key {
            return Err(ConsensusError::InvalidSignature);
        }
        if self
            .current_round_state()
            .is_some_and(|r| r.vote_count() > 0)
        {
            return Err(ConsensusError::ProposalLocked {
                height: self.current_height,
                round: self.current_round,
            });
        }

        sign_block(self.scheme.as_ref(), signing_key, block);
        let hash = self.current_round_mut().set_proposal(block.clone())?;

        let height = self.current_height;
        if let Some(validator) = self.validators.get_mut(proposer) {
            validator.last_proposed_height = height;
        }
        info!(
            height,
            round = self.current_round,
            proposer = %short_hex(proposer),
            block = %short_hex(&hash),
            txs = block.transactions.len(),
            "block proposed"
        );
        Ok(hash)
    }

    /// Build, sign and submit a vote for `block_hash` in the current round.
    pub fn vote_for_block(
        &mut self,
        validator: &Address,
        block_hash: Hash32,
        signing_key: &SecretKeyBytes,
    ) -> Result<VoteOutcome, ConsensusError> {
        let mut vote = Vote {
            validator: *validator,
            block_hash,
            height: self.current_height,
            round: self.current_round,
            timestamp: now_secs(),
            signature: None,
        };
        sign_vote(self.scheme.as_ref(), signing_key, &mut vote);
        self.submit_vote(vote)
    }

    /// Count an already-signed vote. The signature must verify against the
    /// voter's registered public key.
    pub fn submit_vote(&mut self, vote: Vote) -> Result<VoteOutcome, ConsensusError> {
        let public_key = self
            .validators
            .get(&vote.validator)
            .ok_or(ConsensusError::UnknownValidator)?
            .public_key;
        if !verify_vote(self.scheme.as_ref(), &public_key, &vote) {
            return Err(ConsensusError::InvalidSignature);
        }

        let key = (self.current_height, self.current_round);
        let round = self.rounds.get_mut(&key).ok_or(ConsensusError::RoundMismatch {
            height: key.0,
            round: key.1,
            got_height: vote.height,
            got_round: vote.round,
        })?;
        round.add_vote(vote, &self.validators)?;

        if !round.has_consensus() {
            return Ok(VoteOutcome::Accepted {
                voted_stake: round.voted_stake(),
                threshold: round.threshold(),
            });
        }
        let proposed = round.proposed_block().cloned();
        match proposed {
            Some(block) => Ok(VoteOutcome::Finalized(self.finalize(block))),
            None => Err(ConsensusError::NoProposal),
        }
    }

    fn finalize(&mut self, block: Block) -> Block {
        let height = self.current_height;
        info!(
            height,
            round = self.current_round,
            txs = block.transactions.len(),
            "finalized block"
        );
        self.finalized_blocks.insert(height, block.clone());

        self.current_height += 1;
        self.current_round = 0;
        self.open_round();

        if self.config.round_retention_heights > 0 {
            self.prune_rounds(self.config.round_retention_heights);
        }
        block
    }

    /// Drop round history more than `keep_heights` heights behind the
    /// current one. The current round always survives. Returns how many
    /// rounds were removed.
    pub fn prune_rounds(&mut self, keep_heights: u64) -> usize {
        let cutoff = self.current_height.saturating_sub(keep_heights);
        let before = self.rounds.len();
        self.rounds = self.rounds.split_off(&(cutoff, 0));
        let removed = before - self.rounds.len();
        if removed > 0 {
            debug!(removed, cutoff, "pruned round history");
        }
        removed
    }

    pub fn finalized_block(&self, height: u64) -> Option<&Block> {
        self.finalized_blocks.get(&height)
    }

    /// Finalized blocks at or above `from`, in height order.
    pub fn finalized_since(&self, from: u64) -> impl Iterator<Item = &Block> {
        self.finalized_blocks.range(from..).map(|(_, block)| block)
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized_blocks.len()
    }
}
