//! Proof-of-stake BFT consensus for a single process.
//!
//! Validators take turns proposing in round-robin order over the active set
//! captured at the start of each round. A block finalizes once votes carrying
//! strictly more than two thirds of that round's active stake agree on it.

mod config;
mod engine;
mod error;
mod round;
mod validator;

pub use config::ConsensusConfig;
pub use engine::{BftConsensus, VoteOutcome};
pub use error::{ConsensusError, ProposalFault};
pub use round::{quorum_threshold, ConsensusRound};
pub use validator::{Validator, ValidatorSet, ValidatorState};
