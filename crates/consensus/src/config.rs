//! Consensus tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`crate::BftConsensus`].
///
/// Every field has a default so partial JSON documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// How long a round may go without finalizing before the round timer
    /// moves to the next round.
    pub round_timeout_ms: u64,
    /// Round history kept behind the current height. 0 keeps everything.
    pub round_retention_heights: u64,
    /// Upper bound on transactions a proposer packs into one block.
    pub max_block_txs: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: 2_000,
            round_retention_heights: 64,
            max_block_txs: 512,
        }
    }
}

impl ConsensusConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_round_retention(mut self, heights: u64) -> Self {
        self.round_retention_heights = heights;
        self
    }

    pub fn with_max_block_txs(mut self, max: usize) -> Self {
        self.max_block_txs = max;
        self
    }
}
