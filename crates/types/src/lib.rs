//! Core data model shared by every crate in the workspace.
//!
//! Types here are plain data. Hashing, canonical encoding and signing live in
//! `veil-codec` and `veil-crypto`, which depend on this crate.

/// 32-byte content hash (blake3 over a canonical encoding).
pub type Hash32 = [u8; 32];
/// 20-byte account / validator identifier derived from a public key.
pub type Address = [u8; 20];
pub type PublicKeyBytes = [u8; 32];
pub type SecretKeyBytes = [u8; 32];
pub type SignatureBytes = [u8; 64];
/// Opaque token marking a shielded input note as spent.
pub type Nullifier = [u8; 32];
/// Opaque token representing a newly created shielded output note.
pub type Commitment = [u8; 32];

pub const ZERO_HASH: Hash32 = [0u8; 32];

/// Transparent value transfer between two accounts.
///
/// `tx_hash` is fixed when the transaction is created and is never
/// recomputed; signing only fills in `signature`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub tx_hash: Hash32,
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: u64,
    pub signature: Option<SignatureBytes>,
}

impl Transaction {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Nullifier/commitment based transfer. The ledger only looks at set
/// membership of the tokens; payloads are carried for recipients.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShieldedTransaction {
    pub nullifiers: Vec<Nullifier>,
    pub commitments: Vec<Commitment>,
    /// One encrypted note per commitment.
    pub encrypted_payloads: Vec<Vec<u8>>,
    pub proof: Vec<u8>,
}

impl ShieldedTransaction {
    /// Every output commitment must carry exactly one encrypted payload.
    pub fn is_well_formed(&self) -> bool {
        self.commitments.len() == self.encrypted_payloads.len()
    }
}

/// A transaction as it appears inside a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerTx {
    Transparent(Transaction),
    Shielded(ShieldedTransaction),
}

impl LedgerTx {
    pub fn is_shielded(&self) -> bool {
        matches!(self, LedgerTx::Shielded(_))
    }
}

impl From<Transaction> for LedgerTx {
    fn from(tx: Transaction) -> Self {
        LedgerTx::Transparent(tx)
    }
}

impl From<ShieldedTransaction> for LedgerTx {
    fn from(tx: ShieldedTransaction) -> Self {
        LedgerTx::Shielded(tx)
    }
}

/// Fields covered by the block hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub previous_hash: Hash32,
    pub merkle_root: Hash32,
    pub timestamp: u64,
    /// Proposer address.
    pub validator: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<LedgerTx>,
    pub signature: Option<SignatureBytes>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Balance and nonce of a single account. Created lazily with zeroes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub address: Address,
    pub balance: u64,
    pub nonce: u64,
}

impl AccountState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: 0,
            nonce: 0,
        }
    }
}

/// A validator's vote for a block at a given (height, round).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub validator: Address,
    pub block_hash: Hash32,
    pub height: u64,
    pub round: u64,
    pub timestamp: u64,
    pub signature: Option<SignatureBytes>,
}

/// First 8 bytes as lowercase hex, for log lines.
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}
