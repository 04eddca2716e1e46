use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use veil_types::{
    Address, Block, BlockHeader, Hash32, LedgerTx, ShieldedTransaction, SignatureBytes,
    Transaction, Vote,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("trailing bytes after decoded value")]
    TrailingBytes,
    #[error("invalid tag byte {0}")]
    InvalidTag(u8),
    #[error("length does not fit in u32")]
    LengthOverflow,
    #[error("embedded hash does not match decoded fields")]
    HashMismatch,
}

const TAG_TRANSPARENT: u8 = 0;
const TAG_SHIELDED: u8 = 1;

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::UnexpectedEof);
    }
    let (a, b) = input.split_at(n);
    *input = b;
    Ok(a)
}

fn read_u8(input: &mut &[u8]) -> Result<u8, CodecError> {
    Ok(take(input, 1)?[0])
}

fn read_u32_le(input: &mut &[u8]) -> Result<u32, CodecError> {
    let b = take(input, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64_le(input: &mut &[u8]) -> Result<u64, CodecError> {
    let b = take(input, 8)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

fn read_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], CodecError> {
    let b = take(input, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(b);
    Ok(out)
}

fn read_bytes(input: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = read_u32_le(input)? as usize;
    Ok(take(input, len)?.to_vec())
}

fn read_signature(input: &mut &[u8]) -> Result<Option<SignatureBytes>, CodecError> {
    match read_u8(input)? {
        0 => Ok(None),
        1 => Ok(Some(read_array::<64>(input)?)),
        other => Err(CodecError::InvalidTag(other)),
    }
}

fn write_u32_le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64_le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let len_u32: u32 = len.try_into().map_err(|_| CodecError::LengthOverflow)?;
    write_u32_le(out, len_u32);
    Ok(())
}

fn write_bytes(out: &mut Vec<u8>, b: &[u8]) -> Result<(), CodecError> {
    write_len(out, b.len())?;
    out.extend_from_slice(b);
    Ok(())
}

fn write_signature(out: &mut Vec<u8>, sig: &Option<SignatureBytes>) {
    match sig {
        Some(sig) => {
            out.push(1);
            out.extend_from_slice(sig);
        }
        None => out.push(0),
    }
}

fn ensure_consumed(input: &[u8]) -> Result<(), CodecError> {
    if input.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes)
    }
}

/// Count-prefixed sequences come from untrusted input: never reserve more
/// than the remaining bytes could possibly hold.
fn bounded_capacity(count: usize, remaining: usize, min_item: usize) -> usize {
    count.min(remaining / min_item.max(1))
}

/// blake3 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Hash32 {
    *blake3::hash(data).as_bytes()
}

/// address = first 20 bytes of blake3(public_key)
pub fn address_from_public_key(public_key: &[u8]) -> Address {
    let digest = hash_bytes(public_key);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    out
}

/// Current wall-clock time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Transparent transactions
// ---------------------------------------------------------------------------

/// Canonical encoding of the fields the transaction hash commits to.
/// Field order is CONSENSUS-RELEVANT. Changing it is a hard fork.
pub fn encode_tx_header(
    sender: &Address,
    recipient: &Address,
    amount: u64,
    nonce: u64,
    timestamp: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + 20 + 8 * 3);
    out.extend_from_slice(sender);
    out.extend_from_slice(recipient);
    write_u64_le(&mut out, amount);
    write_u64_le(&mut out, nonce);
    write_u64_le(&mut out, timestamp);
    out
}

pub fn transaction_hash(
    sender: &Address,
    recipient: &Address,
    amount: u64,
    nonce: u64,
    timestamp: u64,
) -> Hash32 {
    hash_bytes(&encode_tx_header(sender, recipient, amount, nonce, timestamp))
}

/// Build an unsigned transaction stamped with the current time.
pub fn create_transaction(
    sender: Address,
    recipient: Address,
    amount: u64,
    nonce: u64,
) -> Transaction {
    create_transaction_at(sender, recipient, amount, nonce, now_secs())
}

pub fn create_transaction_at(
    sender: Address,
    recipient: Address,
    amount: u64,
    nonce: u64,
    timestamp: u64,
) -> Transaction {
    Transaction {
        tx_hash: transaction_hash(&sender, &recipient, amount, nonce, timestamp),
        sender,
        recipient,
        amount,
        nonce,
        timestamp,
        signature: None,
    }
}

/// Bytes a transaction signature covers: the frozen hash followed by the
/// header fields as they were at creation.
pub fn tx_signing_message(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 76);
    out.extend_from_slice(&tx.tx_hash);
    out.extend_from_slice(&encode_tx_header(
        &tx.sender,
        &tx.recipient,
        tx.amount,
        tx.nonce,
        tx.timestamp,
    ));
    out
}

pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    let mut out = tx_signing_message(tx);
    write_signature(&mut out, &tx.signature);
    out
}

fn read_transaction(input: &mut &[u8]) -> Result<Transaction, CodecError> {
    let tx_hash: Hash32 = read_array(input)?;
    let sender: Address = read_array(input)?;
    let recipient: Address = read_array(input)?;
    let amount = read_u64_le(input)?;
    let nonce = read_u64_le(input)?;
    let timestamp = read_u64_le(input)?;
    let signature = read_signature(input)?;

    if transaction_hash(&sender, &recipient, amount, nonce, timestamp) != tx_hash {
        return Err(CodecError::HashMismatch);
    }

    Ok(Transaction {
        tx_hash,
        sender,
        recipient,
        amount,
        nonce,
        timestamp,
        signature,
    })
}

pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, CodecError> {
    let mut input = bytes;
    let tx = read_transaction(&mut input)?;
    ensure_consumed(input)?;
    Ok(tx)
}

// ---------------------------------------------------------------------------
// Shielded transactions
// ---------------------------------------------------------------------------

pub fn encode_shielded(tx: &ShieldedTransaction) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    write_len(&mut out, tx.nullifiers.len())?;
    for n in &tx.nullifiers {
        out.extend_from_slice(n);
    }
    write_len(&mut out, tx.commitments.len())?;
    for c in &tx.commitments {
        out.extend_from_slice(c);
    }
    write_len(&mut out, tx.encrypted_payloads.len())?;
    for p in &tx.encrypted_payloads {
        write_bytes(&mut out, p)?;
    }
    write_bytes(&mut out, &tx.proof)?;
    Ok(out)
}

fn read_shielded(input: &mut &[u8]) -> Result<ShieldedTransaction, CodecError> {
    let n_count = read_u32_le(input)? as usize;
    let mut nullifiers = Vec::with_capacity(bounded_capacity(n_count, input.len(), 32));
    for _ in 0..n_count {
        nullifiers.push(read_array::<32>(input)?);
    }

    let c_count = read_u32_le(input)? as usize;
    let mut commitments = Vec::with_capacity(bounded_capacity(c_count, input.len(), 32));
    for _ in 0..c_count {
        commitments.push(read_array::<32>(input)?);
    }

    let p_count = read_u32_le(input)? as usize;
    let mut encrypted_payloads = Vec::with_capacity(bounded_capacity(p_count, input.len(), 4));
    for _ in 0..p_count {
        encrypted_payloads.push(read_bytes(input)?);
    }

    let proof = read_bytes(input)?;

    Ok(ShieldedTransaction {
        nullifiers,
        commitments,
        encrypted_payloads,
        proof,
    })
}

pub fn decode_shielded(bytes: &[u8]) -> Result<ShieldedTransaction, CodecError> {
    let mut input = bytes;
    let tx = read_shielded(&mut input)?;
    ensure_consumed(input)?;
    Ok(tx)
}

/// Identifier for a shielded transaction: blake3 over its full encoding.
pub fn shielded_tx_id(tx: &ShieldedTransaction) -> Result<Hash32, CodecError> {
    Ok(hash_bytes(&encode_shielded(tx)?))
}

/// Mempool / index identifier for either transaction kind.
pub fn ledger_tx_id(tx: &LedgerTx) -> Result<Hash32, CodecError> {
    match tx {
        LedgerTx::Transparent(tx) => Ok(tx.tx_hash),
        LedgerTx::Shielded(tx) => shielded_tx_id(tx),
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Leaf digest contributed by one transaction to the block's merkle root.
/// Shielded transactions are represented by the hash of their first
/// commitment (or of the empty string when there is none).
pub fn merkle_leaf(tx: &LedgerTx) -> Hash32 {
    match tx {
        LedgerTx::Transparent(tx) => tx.tx_hash,
        LedgerTx::Shielded(tx) => match tx.commitments.first() {
            Some(c) => hash_bytes(c),
            None => hash_bytes(&[]),
        },
    }
}

/// Flat digest over the concatenated leaves, not a binary tree: it binds
/// the block to its transactions but offers no inclusion proofs.
pub fn merkle_root(transactions: &[LedgerTx]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    for tx in transactions {
        hasher.update(&merkle_leaf(tx));
    }
    *hasher.finalize().as_bytes()
}

/// Canonical encoding of BlockHeader.
/// Field order is CONSENSUS-RELEVANT. Changing it is a hard fork.
pub fn encode_block_header(h: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 32 + 32 + 8 + 20);
    write_u64_le(&mut out, h.height);
    out.extend_from_slice(&h.previous_hash);
    out.extend_from_slice(&h.merkle_root);
    write_u64_le(&mut out, h.timestamp);
    out.extend_from_slice(&h.validator);
    out
}

fn read_block_header(input: &mut &[u8]) -> Result<BlockHeader, CodecError> {
    Ok(BlockHeader {
        height: read_u64_le(input)?,
        previous_hash: read_array(input)?,
        merkle_root: read_array(input)?,
        timestamp: read_u64_le(input)?,
        validator: read_array(input)?,
    })
}

pub fn decode_block_header(bytes: &[u8]) -> Result<BlockHeader, CodecError> {
    let mut input = bytes;
    let header = read_block_header(&mut input)?;
    ensure_consumed(input)?;
    Ok(header)
}

/// block_hash = blake3(encode_block_header(header)). Transactions only enter
/// through `merkle_root`; the signature never does.
pub fn block_hash(header: &BlockHeader) -> Hash32 {
    hash_bytes(&encode_block_header(header))
}

pub fn create_block(
    height: u64,
    previous_hash: Hash32,
    transactions: Vec<LedgerTx>,
    validator: Address,
) -> Block {
    create_block_at(height, previous_hash, transactions, validator, now_secs())
}

pub fn create_block_at(
    height: u64,
    previous_hash: Hash32,
    transactions: Vec<LedgerTx>,
    validator: Address,
    timestamp: u64,
) -> Block {
    let header = BlockHeader {
        height,
        previous_hash,
        merkle_root: merkle_root(&transactions),
        timestamp,
        validator,
    };
    Block {
        header,
        transactions,
        signature: None,
    }
}

/// Bytes a block signature covers: block hash followed by the proposer.
pub fn block_signing_message(header: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 20);
    out.extend_from_slice(&block_hash(header));
    out.extend_from_slice(&header.validator);
    out
}

pub fn encode_block(block: &Block) -> Result<Vec<u8>, CodecError> {
    let mut out = encode_block_header(&block.header);
    write_len(&mut out, block.transactions.len())?;
    for tx in &block.transactions {
        match tx {
            LedgerTx::Transparent(tx) => {
                out.push(TAG_TRANSPARENT);
                out.extend_from_slice(&encode_transaction(tx));
            }
            LedgerTx::Shielded(tx) => {
                out.push(TAG_SHIELDED);
                out.extend_from_slice(&encode_shielded(tx)?);
            }
        }
    }
    write_signature(&mut out, &block.signature);
    Ok(out)
}

pub fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
    let mut input = bytes;
    let header = read_block_header(&mut input)?;

    let count = read_u32_le(&mut input)? as usize;
    let mut transactions = Vec::with_capacity(bounded_capacity(count, input.len(), 13));
    for _ in 0..count {
        let tx = match read_u8(&mut input)? {
            TAG_TRANSPARENT => LedgerTx::Transparent(read_transaction(&mut input)?),
            TAG_SHIELDED => LedgerTx::Shielded(read_shielded(&mut input)?),
            other => return Err(CodecError::InvalidTag(other)),
        };
        transactions.push(tx);
    }
    let signature = read_signature(&mut input)?;
    ensure_consumed(input)?;

    if merkle_root(&transactions) != header.merkle_root {
        return Err(CodecError::HashMismatch);
    }

    Ok(Block {
        header,
        transactions,
        signature,
    })
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

pub fn vote_signing_message(vote: &Vote) -> Vec<u8> {
    let mut out = Vec::with_capacity(20 + 32 + 8 * 3);
    out.extend_from_slice(&vote.validator);
    out.extend_from_slice(&vote.block_hash);
    write_u64_le(&mut out, vote.height);
    write_u64_le(&mut out, vote.round);
    write_u64_le(&mut out, vote.timestamp);
    out
}

pub fn encode_vote(vote: &Vote) -> Vec<u8> {
    let mut out = vote_signing_message(vote);
    write_signature(&mut out, &vote.signature);
    out
}

pub fn decode_vote(bytes: &[u8]) -> Result<Vote, CodecError> {
    let mut input = bytes;
    let vote = Vote {
        validator: read_array(&mut input)?,
        block_hash: read_array(&mut input)?,
        height: read_u64_le(&mut input)?,
        round: read_u64_le(&mut input)?,
        timestamp: read_u64_le(&mut input)?,
        signature: read_signature(&mut input)?,
    };
    ensure_consumed(input)?;
    Ok(vote)
}
