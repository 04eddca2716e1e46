use blake3::Hasher;
use ed25519_dalek::Signer;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};

use veil_codec::{
    address_from_public_key, block_signing_message, tx_signing_message, vote_signing_message,
};
use veil_types::{
    Address, Block, PublicKeyBytes, SecretKeyBytes, SignatureBytes, Transaction, Vote,
};

pub mod privacy;

pub use privacy::{
    decrypt_note, encrypt_note, note_commitment, note_nullifier, InputNote, OutputNote,
    PresenceProofVerifier, ProofVerifier, ShieldedTxBuilder, StealthAddress, StealthKeys,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("encrypted note has length {0}, expected 40")]
    MalformedNote(usize),
    #[error("shielded inputs total {inputs} but outputs total {outputs}")]
    ValueImbalance { inputs: u128, outputs: u128 },
}

/// Signing capability consumed by the ledger and consensus code.
///
/// The call shape stays the same whichever scheme backs it.
pub trait SignatureScheme: Send + Sync {
    /// Public key that verifies signatures made with `secret`.
    fn public_key(&self, secret: &SecretKeyBytes) -> PublicKeyBytes;

    fn sign(&self, msg: &[u8], secret: &SecretKeyBytes) -> SignatureBytes;

    fn verify(&self, msg: &[u8], sig: &SignatureBytes, public: &PublicKeyBytes) -> bool;
}

/// Ed25519 signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Scheme;

impl SignatureScheme for Ed25519Scheme {
    fn public_key(&self, secret: &SecretKeyBytes) -> PublicKeyBytes {
        SigningKey::from_bytes(secret).verifying_key().to_bytes()
    }

    fn sign(&self, msg: &[u8], secret: &SecretKeyBytes) -> SignatureBytes {
        let sig: Signature = SigningKey::from_bytes(secret).sign(msg);
        sig.to_bytes()
    }

    fn verify(&self, msg: &[u8], sig: &SignatureBytes, public: &PublicKeyBytes) -> bool {
        let Ok(pk) = VerifyingKey::from_bytes(public) else {
            return false;
        };
        let sig = Signature::from_bytes(sig);
        pk.verify_strict(msg, &sig).is_ok()
    }
}

/// Placeholder scheme: signature = blake3-xof(msg || blake3(secret)).
///
/// Anyone holding the public key can produce a valid signature. Only for
/// simulations and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyedHashScheme;

impl KeyedHashScheme {
    fn digest(msg: &[u8], public: &PublicKeyBytes) -> SignatureBytes {
        let mut hasher = Hasher::new();
        hasher.update(msg);
        hasher.update(public);
        let mut out = [0u8; 64];
        hasher.finalize_xof().fill(&mut out);
        out
    }
}

impl SignatureScheme for KeyedHashScheme {
    fn public_key(&self, secret: &SecretKeyBytes) -> PublicKeyBytes {
        *blake3::hash(secret).as_bytes()
    }

    fn sign(&self, msg: &[u8], secret: &SecretKeyBytes) -> SignatureBytes {
        Self::digest(msg, &self.public_key(secret))
    }

    fn verify(&self, msg: &[u8], sig: &SignatureBytes, public: &PublicKeyBytes) -> bool {
        Self::digest(msg, public) == *sig
    }
}

/// Secret/public key pair plus the derived account address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keypair {
    pub secret: SecretKeyBytes,
    pub public: PublicKeyBytes,
    pub address: Address,
}

impl Keypair {
    pub fn from_secret(scheme: &dyn SignatureScheme, secret: SecretKeyBytes) -> Self {
        let public = scheme.public_key(&secret);
        Self {
            secret,
            public,
            address: address_from_public_key(&public),
        }
    }

    /// Fresh key pair from the OS RNG.
    pub fn generate(scheme: &dyn SignatureScheme) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(scheme, secret)
    }
}

/// Sign over the frozen hash and creation-time fields. Re-signing
/// overwrites the previous signature; `tx_hash` is untouched.
pub fn sign_transaction(
    scheme: &dyn SignatureScheme,
    secret: &SecretKeyBytes,
    tx: &mut Transaction,
) {
    tx.signature = Some(scheme.sign(&tx_signing_message(tx), secret));
}

/// False for unsigned transactions.
pub fn verify_transaction(
    scheme: &dyn SignatureScheme,
    public: &PublicKeyBytes,
    tx: &Transaction,
) -> bool {
    match &tx.signature {
        Some(sig) => scheme.verify(&tx_signing_message(tx), sig, public),
        None => false,
    }
}

pub fn sign_block(scheme: &dyn SignatureScheme, secret: &SecretKeyBytes, block: &mut Block) {
    block.signature = Some(scheme.sign(&block_signing_message(&block.header), secret));
}

pub fn verify_block(scheme: &dyn SignatureScheme, public: &PublicKeyBytes, block: &Block) -> bool {
    match &block.signature {
        Some(sig) => scheme.verify(&block_signing_message(&block.header), sig, public),
        None => false,
    }
}

pub fn sign_vote(scheme: &dyn SignatureScheme, secret: &SecretKeyBytes, vote: &mut Vote) {
    vote.signature = Some(scheme.sign(&vote_signing_message(vote), secret));
}

pub fn verify_vote(scheme: &dyn SignatureScheme, public: &PublicKeyBytes, vote: &Vote) -> bool {
    match &vote.signature {
        Some(sig) => scheme.verify(&vote_signing_message(vote), sig, public),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use veil_codec::{create_block_at, create_transaction_at};

    fn schemes() -> Vec<Box<dyn SignatureScheme>> {
        vec![Box::new(Ed25519Scheme), Box::new(KeyedHashScheme)]
    }

    #[test]
    fn transaction_sign_and_verify_for_each_scheme() {
        for scheme in schemes() {
            let alice = Keypair::from_secret(scheme.as_ref(), [7u8; 32]);
            let mut tx = create_transaction_at(alice.address, [2u8; 20], 10, 0, 1000);

            assert!(!verify_transaction(scheme.as_ref(), &alice.public, &tx));

            sign_transaction(scheme.as_ref(), &alice.secret, &mut tx);
            assert!(tx.is_signed());
            assert!(verify_transaction(scheme.as_ref(), &alice.public, &tx));

            // mutating a signed field breaks the signature
            tx.amount += 1;
            assert!(!verify_transaction(scheme.as_ref(), &alice.public, &tx));
        }
    }

    #[test]
    fn resigning_overwrites_and_keeps_hash() {
        let scheme = KeyedHashScheme;
        let a = Keypair::from_secret(&scheme, [1u8; 32]);
        let b = Keypair::from_secret(&scheme, [2u8; 32]);
        let mut tx = create_transaction_at(a.address, b.address, 1, 0, 5);
        let hash = tx.tx_hash;

        sign_transaction(&scheme, &a.secret, &mut tx);
        sign_transaction(&scheme, &b.secret, &mut tx);

        assert_eq!(tx.tx_hash, hash);
        assert!(verify_transaction(&scheme, &b.public, &tx));
        assert!(!verify_transaction(&scheme, &a.public, &tx));
    }

    #[test]
    fn block_signature_wrong_key_fails() {
        let scheme = Ed25519Scheme;
        let proposer = Keypair::from_secret(&scheme, [3u8; 32]);
        let other = Keypair::from_secret(&scheme, [4u8; 32]);
        let mut block = create_block_at(1, [0u8; 32], vec![], proposer.address, 10);

        sign_block(&scheme, &proposer.secret, &mut block);
        assert!(verify_block(&scheme, &proposer.public, &block));
        assert!(!verify_block(&scheme, &other.public, &block));
    }

    #[test]
    fn vote_signature_binds_round() {
        let scheme = Ed25519Scheme;
        let v = Keypair::from_secret(&scheme, [5u8; 32]);
        let mut vote = Vote {
            validator: v.address,
            block_hash: [9u8; 32],
            height: 1,
            round: 0,
            timestamp: 1,
            signature: None,
        };
        sign_vote(&scheme, &v.secret, &mut vote);
        assert!(verify_vote(&scheme, &v.public, &vote));

        vote.round = 1;
        assert!(!verify_vote(&scheme, &v.public, &vote));
    }

    #[test]
    fn tampered_signature_fails() {
        for scheme in schemes() {
            let secret = [1u8; 32];
            let public = scheme.public_key(&secret);
            let mut sig = scheme.sign(b"payload", &secret);

            // flip 1 bit
            sig[0] ^= 0x01;
            assert!(!scheme.verify(b"payload", &sig, &public));
        }
    }

    #[test]
    fn generated_keypairs_differ() {
        let scheme = Ed25519Scheme;
        let a = Keypair::generate(&scheme);
        let b = Keypair::generate(&scheme);
        assert_ne!(a.address, b.address);
        assert_eq!(a.address, address_from_public_key(&a.public));
    }
}
