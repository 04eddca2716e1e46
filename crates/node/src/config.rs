//! Node configuration, loaded from JSON.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use veil_consensus::ConsensusConfig;
use veil_crypto::{Ed25519Scheme, KeyedHashScheme, SignatureScheme};
use veil_types::{Address, SecretKeyBytes};

use crate::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemeKind {
    #[default]
    Ed25519,
    KeyedHash,
}

impl SchemeKind {
    pub fn build(self) -> Arc<dyn SignatureScheme> {
        match self {
            SchemeKind::Ed25519 => Arc::new(Ed25519Scheme),
            SchemeKind::KeyedHash => Arc::new(KeyedHashScheme),
        }
    }
}

/// Initial balance for one account, address in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: String,
    pub balance: u64,
}

/// A validator hosted by this process. The secret is hex; this is a
/// simulation, keys live in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub secret: String,
    pub stake: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub mempool_capacity: usize,
    pub scheme: SchemeKind,
    pub genesis: Vec<GenesisAccount>,
    pub validators: Vec<GenesisValidator>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            mempool_capacity: 10_000,
            scheme: SchemeKind::default(),
            genesis: Vec::new(),
            validators: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, NodeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn with_mempool_capacity(mut self, capacity: usize) -> Self {
        self.mempool_capacity = capacity;
        self
    }

    pub fn with_scheme(mut self, scheme: SchemeKind) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_genesis_account(mut self, address: &Address, balance: u64) -> Self {
        self.genesis.push(GenesisAccount {
            address: hex::encode(address),
            balance,
        });
        self
    }

    pub fn with_validator(mut self, secret: &SecretKeyBytes, stake: u64) -> Self {
        self.validators.push(GenesisValidator {
            secret: hex::encode(secret),
            stake,
        });
        self
    }

    pub fn genesis_allocations(&self) -> Result<Vec<(Address, u64)>, NodeError> {
        self.genesis
            .iter()
            .map(|account| Ok((decode_hex_array(&account.address)?, account.balance)))
            .collect()
    }

    pub fn validator_secrets(&self) -> Result<Vec<(SecretKeyBytes, u64)>, NodeError> {
        self.validators
            .iter()
            .map(|v| Ok((decode_hex_array(&v.secret)?, v.stake)))
            .collect()
    }
}

fn decode_hex_array<const N: usize>(s: &str) -> Result<[u8; N], NodeError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| NodeError::Config(format!("bad hex {s:?}: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        NodeError::Config(format!("expected {N} bytes, got {}", b.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = NodeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.consensus.round_timeout_ms, 2_000);
        assert_eq!(config.mempool_capacity, 10_000);
    }

    #[test]
    fn parses_genesis_and_validators() {
        let json = r#"{
            "consensus": { "round_retention_heights": 8 },
            "scheme": "keyed-hash",
            "genesis": [
                { "address": "0x0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a", "balance": 1000 }
            ],
            "validators": [
                { "secret": "0707070707070707070707070707070707070707070707070707070707070707",
                  "stake": 1000 }
            ]
        }"#;
        let config = NodeConfig::from_json_str(json).unwrap();

        assert_eq!(config.scheme, SchemeKind::KeyedHash);
        assert_eq!(config.consensus.round_retention_heights, 8);
        assert_eq!(config.consensus.max_block_txs, 512);
        assert_eq!(config.genesis_allocations().unwrap(), vec![([0x0Au8; 20], 1_000)]);
        assert_eq!(config.validator_secrets().unwrap(), vec![([7u8; 32], 1_000)]);
    }

    #[test]
    fn builder_round_trips_through_hex() {
        let config = NodeConfig::default()
            .with_genesis_account(&[1u8; 20], 5)
            .with_validator(&[2u8; 32], 9);
        assert_eq!(config.genesis_allocations().unwrap(), vec![([1u8; 20], 5)]);
        assert_eq!(config.validator_secrets().unwrap(), vec![([2u8; 32], 9)]);
    }

    #[test]
    fn bad_address_is_config_error() {
        let mut config = NodeConfig::default();
        config.genesis.push(GenesisAccount {
            address: "abcd".into(),
            balance: 1,
        });
        assert!(matches!(
            config.genesis_allocations(),
            Err(NodeError::Config(_))
        ));

        config.genesis[0].address = "zz".into();
        assert!(matches!(
            config.genesis_allocations(),
            Err(NodeError::Config(_))
        ));
    }
}
