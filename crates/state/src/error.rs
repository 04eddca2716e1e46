use thiserror::Error;
use veil_types::{Hash32, Nullifier};

/// Why a single transaction was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("insufficient funds: balance {balance}, amount {amount}")]
    InsufficientFunds { balance: u64, amount: u64 },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("nullifier {} already spent", hex::encode(.0))]
    DoubleSpend(Nullifier),

    #[error("nullifier {} listed twice in one transaction", hex::encode(.0))]
    DuplicateNullifier(Nullifier),

    #[error("shielded proof rejected")]
    InvalidProof,

    #[error("{commitments} commitments but {payloads} encrypted payloads")]
    MalformedShielded { commitments: usize, payloads: usize },

    #[error("recipient balance would overflow")]
    BalanceOverflow,
}

/// Why a block (or a genesis allocation) was refused. State is unchanged
/// whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },

    #[error(
        "previous hash {} does not extend chain tip {}",
        hex::encode(.got),
        hex::encode(.expected)
    )]
    InvalidChain { expected: Hash32, got: Hash32 },

    #[error(
        "header merkle root {} does not match transactions ({})",
        hex::encode(.got),
        hex::encode(.expected)
    )]
    MerkleMismatch { expected: Hash32, got: Hash32 },

    #[error("transaction {index} invalid: {source}")]
    InvalidTransaction {
        index: usize,
        #[source]
        source: TxError,
    },

    #[error("genesis allocations are closed at height {height}")]
    GenesisClosed { height: u64 },
}
