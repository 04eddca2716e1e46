//! Simulated shielded-transfer primitives.
//!
//! None of this is cryptographically sound: nullifiers and commitments are
//! plain blake3 digests, note encryption is a keystream XOR and the "proof"
//! is a hash transcript. The ledger only ever sees the resulting tokens and
//! asks a [`ProofVerifier`] for a yes/no answer.

use blake3::Hasher;
use rand_core::{CryptoRng, OsRng, RngCore};

use veil_codec::address_from_public_key;
use veil_types::{
    Address, Commitment, Nullifier, PublicKeyBytes, SecretKeyBytes, ShieldedTransaction,
};

use crate::CryptoError;

const NOTE_PLAINTEXT_LEN: usize = 8 + 32;

/// Proof-verification capability for shielded transactions.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, tx: &ShieldedTransaction) -> bool;
}

/// Accepts any transaction that carries a non-empty proof blob.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresenceProofVerifier;

impl ProofVerifier for PresenceProofVerifier {
    fn verify(&self, tx: &ShieldedTransaction) -> bool {
        !tx.proof.is_empty()
    }
}

/// nullifier = blake3(note || spender_secret)
pub fn note_nullifier(note: &[u8], spender_secret: &SecretKeyBytes) -> Nullifier {
    let mut hasher = Hasher::new();
    hasher.update(note);
    hasher.update(spender_secret);
    *hasher.finalize().as_bytes()
}

/// commitment = blake3(value_le || recipient || blinding)
pub fn note_commitment(value: u64, recipient: &Address, blinding: &[u8; 32]) -> Commitment {
    let mut hasher = Hasher::new();
    hasher.update(&value.to_le_bytes());
    hasher.update(recipient);
    hasher.update(blinding);
    *hasher.finalize().as_bytes()
}

fn keystream(recipient_key: &[u8], len: usize) -> Vec<u8> {
    let mut hasher = Hasher::new();
    hasher.update(recipient_key);
    let mut out = vec![0u8; len];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Encrypt `(value, blinding)` for the holder of `recipient_key`.
pub fn encrypt_note(value: u64, blinding: &[u8; 32], recipient_key: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(NOTE_PLAINTEXT_LEN);
    plaintext.extend_from_slice(&value.to_le_bytes());
    plaintext.extend_from_slice(blinding);

    keystream(recipient_key, plaintext.len())
        .iter()
        .zip(plaintext.iter())
        .map(|(k, p)| k ^ p)
        .collect()
}

pub fn decrypt_note(
    ciphertext: &[u8],
    recipient_key: &[u8],
) -> Result<(u64, [u8; 32]), CryptoError> {
    if ciphertext.len() != NOTE_PLAINTEXT_LEN {
        return Err(CryptoError::MalformedNote(ciphertext.len()));
    }
    let plain: Vec<u8> = keystream(recipient_key, ciphertext.len())
        .iter()
        .zip(ciphertext.iter())
        .map(|(k, c)| k ^ c)
        .collect();

    let mut value = [0u8; 8];
    value.copy_from_slice(&plain[..8]);
    let mut blinding = [0u8; 32];
    blinding.copy_from_slice(&plain[8..]);
    Ok((u64::from_le_bytes(value), blinding))
}

/// An existing note being spent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputNote {
    pub note: Vec<u8>,
    pub value: u64,
    pub blinding: [u8; 32],
}

/// A new note to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputNote {
    pub recipient: Address,
    pub value: u64,
}

/// Builds [`ShieldedTransaction`]s from input and output notes.
pub struct ShieldedTxBuilder;

impl ShieldedTxBuilder {
    pub fn construct(
        inputs: &[InputNote],
        outputs: &[OutputNote],
        sender_secret: &SecretKeyBytes,
    ) -> Result<ShieldedTransaction, CryptoError> {
        Self::construct_with_rng(inputs, outputs, sender_secret, &mut OsRng)
    }

    /// Same as [`ShieldedTxBuilder::construct`] with a caller-supplied RNG for the
    /// per-output blinding factors.
    pub fn construct_with_rng<R: RngCore + CryptoRng>(
        inputs: &[InputNote],
        outputs: &[OutputNote],
        sender_secret: &SecretKeyBytes,
        rng: &mut R,
    ) -> Result<ShieldedTransaction, CryptoError> {
        let total_in: u128 = inputs.iter().map(|i| u128::from(i.value)).sum();
        let total_out: u128 = outputs.iter().map(|o| u128::from(o.value)).sum();
        if total_in != total_out {
            return Err(CryptoError::ValueImbalance {
                inputs: total_in,
                outputs: total_out,
            });
        }

        let nullifiers: Vec<Nullifier> = inputs
            .iter()
            .map(|input| note_nullifier(&input.note, sender_secret))
            .collect();

        let mut commitments = Vec::with_capacity(outputs.len());
        let mut encrypted_payloads = Vec::with_capacity(outputs.len());
        for output in outputs {
            let mut blinding = [0u8; 32];
            rng.fill_bytes(&mut blinding);
            commitments.push(note_commitment(output.value, &output.recipient, &blinding));
            // recipients decrypt with their address until key exchange exists
            encrypted_payloads.push(encrypt_note(output.value, &blinding, &output.recipient));
        }

        let mut transcript = Hasher::new();
        for n in &nullifiers {
            transcript.update(n);
        }
        for c in &commitments {
            transcript.update(c);
        }
        transcript.update(sender_secret);
        let proof = transcript.finalize().as_bytes().to_vec();

        Ok(ShieldedTransaction {
            nullifiers,
            commitments,
            encrypted_payloads,
            proof,
        })
    }
}

/// Secrets behind a [`StealthAddress`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StealthKeys {
    pub scan_secret: SecretKeyBytes,
    pub spend_secret: SecretKeyBytes,
}

/// Published recipient keys from which senders derive one-time addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StealthAddress {
    pub scan_public: PublicKeyBytes,
    pub spend_public: PublicKeyBytes,
}

impl StealthAddress {
    pub fn generate() -> (StealthAddress, StealthKeys) {
        let mut keys = StealthKeys {
            scan_secret: [0u8; 32],
            spend_secret: [0u8; 32],
        };
        OsRng.fill_bytes(&mut keys.scan_secret);
        OsRng.fill_bytes(&mut keys.spend_secret);
        (Self::from_keys(&keys), keys)
    }

    pub fn from_keys(keys: &StealthKeys) -> StealthAddress {
        StealthAddress {
            scan_public: *blake3::hash(&keys.scan_secret).as_bytes(),
            spend_public: *blake3::hash(&keys.spend_secret).as_bytes(),
        }
    }

    /// One-time address for a payment from the holder of `sender_secret`.
    pub fn create_ephemeral_address(&self, sender_secret: &SecretKeyBytes) -> Address {
        let mut shared = Hasher::new();
        shared.update(sender_secret);
        shared.update(&self.scan_public);
        let shared = shared.finalize();

        let mut ephemeral = Hasher::new();
        ephemeral.update(shared.as_bytes());
        ephemeral.update(&self.spend_public);
        address_from_public_key(ephemeral.finalize().as_bytes())
    }
}
