//! One (height, round) voting instance.

use std::collections::HashMap;

use tracing::debug;
use veil_codec::block_hash;
use veil_types::{short_hex, Address, Block, Hash32, Vote};

use crate::validator::ValidatorSet;
use crate::ConsensusError;

/// Stake needed to finalize: strictly more than two thirds of `total`.
pub fn quorum_threshold(total: u64) -> u64 {
    // u128 so that `total * 2` cannot overflow; the result always fits in u64
    ((u128::from(total) * 2) / 3 + 1) as u64
}

/// Voting state for a single round.
///
/// The active set is captured when the round opens. Proposer selection and
/// the threshold use that snapshot even if stakes change mid-round; a vote's
/// weight is the voter's stake at the time the vote is counted.
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    height: u64,
    round: u64,
    eligible: Vec<(Address, u64)>,
    total_active_stake: u64,
    threshold: u64,
    proposed_block: Option<Block>,
    proposed_hash: Option<Hash32>,
    votes: HashMap<Address, Vote>,
    voted_stake: u64,
}

impl ConsensusRound {
    pub fn new(height: u64, round: u64, validators: &ValidatorSet) -> Self {
        let eligible = validators.active_snapshot();
        let total_active_stake = eligible
            .iter()
            .fold(0u64, |acc, (_, stake)| acc.saturating_add(*stake));

        Self {
            height,
            round,
            eligible,
            total_active_stake,
            threshold: quorum_threshold(total_active_stake),
            proposed_block: None,
            proposed_hash: None,
            votes: HashMap::new(),
            voted_stake: 0,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn total_active_stake(&self) -> u64 {
        self.total_active_stake
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn voted_stake(&self) -> u64 {
        self.voted_stake
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn has_voted(&self, validator: &Address) -> bool {
        self.votes.contains_key(validator)
    }

    pub fn proposed_block(&self) -> Option<&Block> {
        self.proposed_block.as_ref()
    }

    pub fn proposed_hash(&self) -> Option<Hash32> {
        self.proposed_hash
    }

    /// Active validators captured when the round opened.
    pub fn eligible(&self) -> &[(Address, u64)] {
        &self.eligible
    }

    pub fn is_eligible(&self, validator: &Address) -> bool {
        self.eligible.iter().any(|(addr, _)| addr == validator)
    }

    /// Round-robin over the snapshot: index `(height + round) % len`.
    pub fn proposer(&self) -> Option<Address> {
        if self.eligible.is_empty() {
            return None;
        }
        let len = self.eligible.len() as u64;
        let idx = (self.height.wrapping_add(self.round) % len) as usize;
        Some(self.eligible[idx].0)
    }

    /// Record the round's proposal. A proposal can be replaced until the
    /// first vote arrives.
    pub fn set_proposal(&mut self, block: Block) -> Result<Hash32, ConsensusError> {
        if !self.votes.is_empty() {
            return Err(ConsensusError::ProposalLocked {
                height: self.height,
                round: self.round,
            });
        }
        let hash = block_hash(&block.header);
        self.proposed_hash = Some(hash);
        self.proposed_block = Some(block);
        Ok(hash)
    }

    /// Count `vote` toward the threshold.
    ///
    /// On error the round is unchanged.
    pub fn add_vote(
        &mut self,
        vote: Vote,
        validators: &ValidatorSet,
    ) -> Result<(), ConsensusError> {
        if vote.height != self.height || vote.round != self.round {
            return Err(ConsensusError::RoundMismatch {
                height: self.height,
                round: self.round,
                got_height: vote.height,
                got_round: vote.round,
            });
        }
        if self.votes.contains_key(&vote.validator) {
            return Err(ConsensusError::DuplicateVote);
        }

        let validator = validators
            .get(&vote.validator)
            .ok_or(ConsensusError::UnknownValidator)?;
        if !validator.is_active() || !self.is_eligible(&vote.validator) {
            return Err(ConsensusError::InactiveValidator);
        }

        match self.proposed_hash {
            None => return Err(ConsensusError::NoProposal),
            Some(hash) if hash != vote.block_hash => return Err(ConsensusError::BlockMismatch),
            Some(_) => {}
        }

        self.voted_stake = self.voted_stake.saturating_add(validator.stake);
        debug!(
            height = self.height,
            round = self.round,
            voter = %short_hex(&vote.validator),
            stake = validator.stake,
            voted = self.voted_stake,
            threshold = self.threshold,
            "vote counted"
        );
        self.votes.insert(vote.validator, vote);
        Ok(())
    }

    pub fn has_consensus(&self) -> bool {
        self.voted_stake >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use veil_codec::create_block_at;
    use veil_types::ZERO_HASH;

    use crate::Validator;

    fn set(stakes: &[u64]) -> ValidatorSet {
        let mut set = ValidatorSet::new();
        for (i, stake) in stakes.iter().enumerate() {
            let tag = i as u8 + 1;
            set.register(Validator::new([tag; 20], [tag; 32], *stake))
                .unwrap();
        }
        set
    }

    fn vote(tag: u8, hash: Hash32, height: u64, round: u64) -> Vote {
        Vote {
            validator: [tag; 20],
            block_hash: hash,
            height,
            round,
            timestamp: 0,
            signature: None,
        }
    }

    fn proposed(round: &mut ConsensusRound) -> Hash32 {
        let block = create_block_at(round.height(), ZERO_HASH, vec![], [1u8; 20], 5);
        round.set_proposal(block).unwrap()
    }

    #[test]
    fn threshold_is_strict_two_thirds() {
        assert_eq!(quorum_threshold(0), 1);
        assert_eq!(quorum_threshold(1_000), 667);
        assert_eq!(quorum_threshold(1_500), 1_001);
        assert_eq!(quorum_threshold(3), 3);
        assert_eq!(quorum_threshold(u64::MAX), (u128::from(u64::MAX) * 2 / 3 + 1) as u64);
    }

    #[test]
    fn threshold_needs_more_than_the_larger_validator() {
        let validators = set(&[1_000, 500]);
        let mut round = ConsensusRound::new(1, 0, &validators);
        let hash = proposed(&mut round);

        round.add_vote(vote(1, hash, 1, 0), &validators).unwrap();
        assert_eq!(round.voted_stake(), 1_000);
        assert!(!round.has_consensus());

        round.add_vote(vote(2, hash, 1, 0), &validators).unwrap();
        assert!(round.has_consensus());
    }

    #[test]
    fn duplicate_vote_leaves_stake_unchanged() {
        let validators = set(&[10, 10, 10]);
        let mut round = ConsensusRound::new(1, 0, &validators);
        let hash = proposed(&mut round);

        round.add_vote(vote(1, hash, 1, 0), &validators).unwrap();
        assert_eq!(
            round.add_vote(vote(1, hash, 1, 0), &validators),
            Err(ConsensusError::DuplicateVote)
        );
        assert_eq!(round.voted_stake(), 10);
        assert_eq!(round.vote_count(), 1);
    }

    #[test]
    fn vote_rejections() {
        let validators = set(&[10, 0, 10]);
        let mut round = ConsensusRound::new(2, 1, &validators);

        assert_eq!(
            round.add_vote(vote(1, [7u8; 32], 2, 1), &validators),
            Err(ConsensusError::NoProposal)
        );

        let hash = proposed(&mut round);
        assert_eq!(
            round.add_vote(vote(1, hash, 2, 0), &validators),
            Err(ConsensusError::RoundMismatch {
                height: 2,
                round: 1,
                got_height: 2,
                got_round: 0
            })
        );
        assert_eq!(
            round.add_vote(vote(2, hash, 2, 1), &validators),
            Err(ConsensusError::InactiveValidator)
        );
        assert_eq!(
            round.add_vote(vote(9, hash, 2, 1), &validators),
            Err(ConsensusError::UnknownValidator)
        );
        assert_eq!(
            round.add_vote(vote(3, [7u8; 32], 2, 1), &validators),
            Err(ConsensusError::BlockMismatch)
        );
        assert_eq!(round.voted_stake(), 0);
    }

    #[test]
    fn proposal_locks_after_first_vote() {
        let validators = set(&[10, 10]);
        let mut round = ConsensusRound::new(1, 0, &validators);
        proposed(&mut round);
        let hash = proposed(&mut round);

        round.add_vote(vote(1, hash, 1, 0), &validators).unwrap();
        let other = create_block_at(1, ZERO_HASH, vec![], [1u8; 20], 6);
        assert_eq!(
            round.set_proposal(other),
            Err(ConsensusError::ProposalLocked {
                height: 1,
                round: 0
            })
        );
        assert_eq!(round.proposed_hash(), Some(hash));
    }

    #[test]
    fn proposer_rotates_over_snapshot() {
        let validators = set(&[10, 0, 10, 10]);
        let active = [[1u8; 20], [3u8; 20], [4u8; 20]];

        for (h, r) in [(1u64, 0u64), (1, 1), (2, 0), (5, 7)] {
            let round = ConsensusRound::new(h, r, &validators);
            assert_eq!(round.proposer(), Some(active[((h + r) % 3) as usize]));
        }

        let empty = ConsensusRound::new(1, 0, &set(&[0, 0]));
        assert_eq!(empty.proposer(), None);
        assert_eq!(empty.threshold(), 1);
    }

    #[test]
    fn snapshot_ignores_later_activation() {
        let mut validators = set(&[10, 0]);
        let mut round = ConsensusRound::new(1, 0, &validators);
        let hash = proposed(&mut round);

        validators.get_mut(&[2u8; 20]).unwrap().update_stake(50);
        assert_eq!(
            round.add_vote(vote(2, hash, 1, 0), &validators),
            Err(ConsensusError::InactiveValidator)
        );
        assert_eq!(round.threshold(), quorum_threshold(10));
    }

    #[test]
    fn snapshot_member_that_lost_its_stake_cannot_vote() {
        let mut validators = set(&[10, 10, 10]);
        let mut round = ConsensusRound::new(1, 0, &validators);
        let hash = proposed(&mut round);
        round.add_vote(vote(1, hash, 1, 0), &validators).unwrap();

        validators.get_mut(&[2u8; 20]).unwrap().update_stake(-10);
        assert!(round.is_eligible(&[2u8; 20]));
        assert_eq!(
            round.add_vote(vote(2, hash, 1, 0), &validators),
            Err(ConsensusError::InactiveValidator)
        );

        validators.get_mut(&[3u8; 20]).unwrap().jail();
        assert_eq!(
            round.add_vote(vote(3, hash, 1, 0), &validators),
            Err(ConsensusError::InactiveValidator)
        );
        assert_eq!(round.voted_stake(), 10);
        assert_eq!(round.vote_count(), 1);
    }

    #[test]
    fn vote_weight_is_current_stake() {
        let mut validators = set(&[30, 30, 30]);
        let mut round = ConsensusRound::new(1, 0, &validators);
        let hash = proposed(&mut round);

        // threshold was fixed at 61 when the round opened
        validators.get_mut(&[1u8; 20]).unwrap().update_stake(40);
        round.add_vote(vote(1, hash, 1, 0), &validators).unwrap();
        assert_eq!(round.voted_stake(), 70);
        assert!(round.has_consensus());
    }
}
