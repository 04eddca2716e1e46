use std::fs;
use std::path::Path;

use veil_codec::{
    decode_block_header, decode_shielded, decode_vote, encode_block_header, encode_shielded,
    encode_tx_header, encode_vote,
};
use veil_types::{Address, BlockHeader, Hash32, ShieldedTransaction, Vote};

fn write_or_compare(path: &Path, actual: &[u8]) {
    let update = std::env::var("UPDATE_VECTORS").ok().as_deref() == Some("1");

    if update {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create vectors dir");
        }
        fs::write(path, actual).expect("write vector file");
        return;
    }

    let expected = fs::read(path).unwrap_or_else(|_| {
        panic!("missing vector file: {path:?}. Run with UPDATE_VECTORS=1 to generate.")
    });

    assert_eq!(
        expected, actual,
        "golden vector mismatch for {path:?} (encoding drift?)"
    );
}

fn sample_header() -> BlockHeader {
    let previous_hash: Hash32 = [0xAAu8; 32];
    let merkle_root: Hash32 = [0xBBu8; 32];
    let validator: Address = [0xDDu8; 20];

    BlockHeader {
        height: 123,
        previous_hash,
        merkle_root,
        timestamp: 1_700_000_000,
        validator,
    }
}

fn sample_shielded() -> ShieldedTransaction {
    ShieldedTransaction {
        nullifiers: vec![[0x01u8; 32]],
        commitments: vec![[0x02u8; 32], [0x03u8; 32]],
        encrypted_payloads: vec![b"hello".to_vec(), b"world!".to_vec()],
        proof: vec![0xEEu8; 4],
    }
}

fn sample_vote() -> Vote {
    Vote {
        validator: [0x44u8; 20],
        block_hash: [0x55u8; 32],
        height: 9,
        round: 2,
        timestamp: 1_700_000_000,
        signature: Some([0x66u8; 64]),
    }
}

#[test]
fn golden_vectors_headers_shielded_and_votes() {
    let header = sample_header();
    let shielded = sample_shielded();
    let vote = sample_vote();

    // --- Encode ---
    let tx_header = encode_tx_header(&[0x11u8; 20], &[0x22u8; 20], 100, 7, 1_700_000_000);
    let header_bytes = encode_block_header(&header);
    let shielded_bytes = encode_shielded(&shielded).expect("encode shielded");
    let vote_bytes = encode_vote(&vote);

    // --- Decode checks ---
    assert_eq!(tx_header.len(), 64);
    assert_eq!(decode_block_header(&header_bytes).expect("decode header"), header);
    assert_eq!(
        decode_shielded(&shielded_bytes).expect("decode shielded"),
        shielded
    );
    assert_eq!(decode_vote(&vote_bytes).expect("decode vote"), vote);

    // --- Golden file paths (relative to crates/codec) ---
    write_or_compare(Path::new("tests/vectors/tx_header.bin"), &tx_header);
    write_or_compare(Path::new("tests/vectors/block_header.bin"), &header_bytes);
    write_or_compare(Path::new("tests/vectors/shielded_tx.bin"), &shielded_bytes);
    write_or_compare(Path::new("tests/vectors/vote_signed.bin"), &vote_bytes);
}
