//! JSON views for display. Byte fields are lowercase hex.

use serde_json::{json, Value};
use veil_codec::block_hash;
use veil_types::{Block, LedgerTx, ShieldedTransaction, Transaction};

pub fn transaction_json(tx: &Transaction) -> Value {
    json!({
        "tx_hash": hex::encode(tx.tx_hash),
        "sender": hex::encode(tx.sender),
        "recipient": hex::encode(tx.recipient),
        "amount": tx.amount,
        "nonce": tx.nonce,
        "timestamp": tx.timestamp,
        "signature": tx.signature.map(hex::encode),
    })
}

/// Shielded transactions only expose their public tokens.
pub fn shielded_json(tx: &ShieldedTransaction) -> Value {
    json!({
        "type": "confidential",
        "nullifiers": tx.nullifiers.iter().map(hex::encode).collect::<Vec<_>>(),
        "commitments": tx.commitments.iter().map(hex::encode).collect::<Vec<_>>(),
    })
}

pub fn block_json(block: &Block) -> Value {
    let transactions: Vec<Value> = block
        .transactions
        .iter()
        .map(|tx| match tx {
            LedgerTx::Transparent(tx) => transaction_json(tx),
            LedgerTx::Shielded(tx) => shielded_json(tx),
        })
        .collect();

    json!({
        "height": block.header.height,
        "hash": hex::encode(block_hash(&block.header)),
        "previous_hash": hex::encode(block.header.previous_hash),
        "merkle_root": hex::encode(block.header.merkle_root),
        "timestamp": block.header.timestamp,
        "validator": hex::encode(block.header.validator),
        "transactions": transactions,
        "signature": block.signature.map(hex::encode),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use veil_codec::{create_block_at, create_transaction_at};

    #[test]
    fn block_view_has_hex_fields_and_tagged_shielded_entries() {
        let shielded = ShieldedTransaction {
            nullifiers: vec![[0xABu8; 32]],
            commitments: vec![[0xCDu8; 32]],
            encrypted_payloads: vec![vec![1, 2]],
            proof: vec![1],
        };
        let block = create_block_at(
            3,
            [1u8; 32],
            vec![
                create_transaction_at([2u8; 20], [3u8; 20], 9, 0, 5).into(),
                shielded.into(),
            ],
            [4u8; 20],
            77,
        );

        let view = block_json(&block);
        assert_eq!(view["height"], 3);
        assert_eq!(view["previous_hash"], hex::encode([1u8; 32]));
        assert_eq!(view["validator"], "04".repeat(20));
        assert_eq!(view["signature"], Value::Null);
        assert_eq!(view["transactions"][0]["amount"], 9);
        assert_eq!(view["transactions"][0]["sender"], "02".repeat(20));
        assert_eq!(view["transactions"][1]["type"], "confidential");
        assert_eq!(view["transactions"][1]["nullifiers"][0], "ab".repeat(32));
        assert!(view["transactions"][1].get("proof").is_none());
    }
}
