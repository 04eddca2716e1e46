use thiserror::Error;

use veil_codec::CodecError;
use veil_consensus::ConsensusError;
use veil_mempool::MempoolError;
use veil_state::{StateError, TxError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transaction rejected: {0}")]
    Tx(#[from] TxError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("proposal does not apply to the ledger: {0}")]
    InvalidProposal(#[source] StateError),

    #[error("validator {0} is not hosted by this node")]
    NotHosted(String),
}
