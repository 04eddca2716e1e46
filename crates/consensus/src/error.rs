use thiserror::Error;

/// Why a proposal was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalFault {
    #[error("proposer is not the selected validator for this round")]
    NotSelected,
    #[error("block height {got} does not match consensus height {expected}")]
    WrongHeight { expected: u64, got: u64 },
    #[error("block names a different validator than the proposer")]
    ValidatorMismatch,
}

/// Rejections from the consensus engine. None of them modify committed
/// consensus state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("invalid proposal: {0}")]
    InvalidProposer(ProposalFault),

    #[error("no active validators")]
    NoActiveValidators,

    #[error("round {round} at height {height} already has votes; proposal is locked")]
    ProposalLocked { height: u64, round: u64 },

    #[error("no block proposed in this round yet")]
    NoProposal,

    #[error("vote is for a block other than the round's proposal")]
    BlockMismatch,

    #[error("validator already voted in this round")]
    DuplicateVote,

    #[error("validator is not active in this round")]
    InactiveValidator,

    #[error("vote for ({got_height}, {got_round}) but round is ({height}, {round})")]
    RoundMismatch {
        height: u64,
        round: u64,
        got_height: u64,
        got_round: u64,
    },

    #[error("signature does not verify against the validator key")]
    InvalidSignature,

    #[error("unknown validator")]
    UnknownValidator,

    #[error("validator already registered")]
    DuplicateValidator,
}
