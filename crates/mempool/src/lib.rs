use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::debug;
use veil_codec::{ledger_tx_id, CodecError};
use veil_types::{short_hex, Block, Hash32, LedgerTx, Nullifier};

/// Errors returned by [`Mempool`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MempoolError {
    #[error("transaction already pending")]
    Duplicate,
    #[error("mempool full ({capacity} transactions)")]
    Full { capacity: usize },
    #[error("nullifier {} already claimed by a pending transaction", short_hex(.0))]
    NullifierConflict(Nullifier),
    #[error("cannot derive transaction id: {0}")]
    Codec(#[from] CodecError),
}

/// FIFO pool of pending ledger transactions, keyed by transaction id.
///
/// Notes:
/// - Ordering is FIFO by insertion time.
/// - A shielded transaction is refused while another pending transaction
///   claims any of its nullifiers; only one of them could ever apply.
/// - `remove()` is supported; drained items skip anything already removed.
pub struct Mempool {
    capacity: usize,
    by_id: HashMap<Hash32, LedgerTx>,
    order: VecDeque<Hash32>,
    claimed_nullifiers: HashMap<Nullifier, Hash32>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_id: HashMap::new(),
            order: VecDeque::new(),
            claimed_nullifiers: HashMap::new(),
        }
    }

    /// Insert a transaction and return its id.
    pub fn insert(&mut self, tx: LedgerTx) -> Result<Hash32, MempoolError> {
        let id = ledger_tx_id(&tx)?;
        if self.by_id.contains_key(&id) {
            return Err(MempoolError::Duplicate);
        }
        if self.by_id.len() >= self.capacity {
            return Err(MempoolError::Full {
                capacity: self.capacity,
            });
        }
        if let LedgerTx::Shielded(shielded) = &tx {
            if let Some(n) = shielded
                .nullifiers
                .iter()
                .find(|n| self.claimed_nullifiers.contains_key(*n))
            {
                return Err(MempoolError::NullifierConflict(*n));
            }
            for n in &shielded.nullifiers {
                self.claimed_nullifiers.insert(*n, id);
            }
        }

        debug!(id = %short_hex(&id), shielded = tx.is_shielded(), "mempool insert");
        self.by_id.insert(id, tx);
        self.order.push_back(id);
        Ok(id)
    }

    /// Remove a transaction by id.
    pub fn remove(&mut self, id: &Hash32) -> Option<LedgerTx> {
        let tx = self.by_id.remove(id)?;
        self.release_nullifiers(&tx);
        Some(tx)
    }

    fn release_nullifiers(&mut self, tx: &LedgerTx) {
        if let LedgerTx::Shielded(shielded) = tx {
            for n in &shielded.nullifiers {
                self.claimed_nullifiers.remove(n);
            }
        }
    }

    /// Drop every transaction that made it into `block`. Returns how many
    /// were pending.
    pub fn remove_included(&mut self, block: &Block) -> usize {
        block
            .transactions
            .iter()
            .filter_map(|tx| ledger_tx_id(tx).ok())
            .filter(|id| self.remove(id).is_some())
            .count()
    }

    pub fn contains(&self, id: &Hash32) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &Hash32) -> Option<&LedgerTx> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drain up to `max` transactions in FIFO order.
    ///
    /// This skips ids that were previously removed.
    pub fn drain_ready(&mut self, max: usize) -> Vec<LedgerTx> {
        if max == 0 {
            return Vec::new();
        }

        // never pre-allocate with an untrusted `max`
        let cap = max.min(self.order.len());
        let mut out = Vec::with_capacity(cap);

        while out.len() < max {
            let Some(id) = self.order.pop_front() else {
                break;
            };

            if let Some(tx) = self.by_id.remove(&id) {
                self.release_nullifiers(&tx);
                out.push(tx);
            }
        }

        out
    }
}
