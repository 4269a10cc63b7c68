use std::fmt;

use ed25519_dalek::Signer as _;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;

use quarry_codec::txid;
use quarry_types::{Address, Hash32, PublicKeyBytes, SignatureBytes, Transaction, ADDRESS_LEN};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid secret key encoding")]
    InvalidSecretKey,
}

/// Key material able to sign on behalf of one address.
///
/// The ledger only ever needs the public key and a signature over a 32-byte
/// transaction id; how the secret is stored is up to the implementor.
pub trait Signer {
    fn public_key(&self) -> PublicKeyBytes;

    fn sign(&self, hash: &Hash32) -> SignatureBytes;

    fn address(&self) -> Address {
        address_from_public_key(&self.public_key())
    }
}

/// Derive the canonical Address from public key bytes:
/// address = blake3(pubkey_bytes)[..20]
pub fn address_from_public_key(pk: &PublicKeyBytes) -> Address {
    let digest = blake3::hash(pk);
    let mut out = [0u8; ADDRESS_LEN];
    out.copy_from_slice(&digest.as_bytes()[..ADDRESS_LEN]);
    Address::from_bytes(out)
}

/// Verify `sig` over `hash`. A bad signature is `Ok(false)`; only key bytes
/// that are not a valid curve point produce an error.
pub fn verify(
    pk: &PublicKeyBytes,
    hash: &Hash32,
    sig: &SignatureBytes,
) -> Result<bool, CryptoError> {
    let vk = VerifyingKey::from_bytes(pk).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(sig);
    Ok(vk.verify_strict(hash, &sig).is_ok())
}

/// Ed25519 signing key.
pub struct Keypair {
    sk: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            sk: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            sk: SigningKey::from_bytes(bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.sk.to_bytes()
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.secret_bytes())
    }
}

impl Signer for Keypair {
    fn public_key(&self) -> PublicKeyBytes {
        self.sk.verifying_key().to_bytes()
    }

    fn sign(&self, hash: &Hash32) -> SignatureBytes {
        self.sk.sign(hash).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Sign a transaction over its id (the unsigned encoding's hash).
///
/// Sets `public_key`, and rewrites `from` to the signer's address so the
/// transaction is self-consistent.
pub fn sign_tx<S: Signer + ?Sized>(signer: &S, tx: &mut Transaction) {
    let pk = signer.public_key();
    tx.public_key = Some(pk);
    tx.from = Some(address_from_public_key(&pk));
    let id = txid(tx);
    tx.signature = Some(signer.sign(&id));
}

/// Check a transaction's signature and sender binding.
///
/// Coinbase transactions are unsigned and verify trivially. A transfer
/// without key or signature, or whose `from` does not match its key, is
/// `Ok(false)`.
pub fn verify_tx(tx: &Transaction) -> Result<bool, CryptoError> {
    let Some(from) = tx.from else {
        return Ok(true);
    };
    let (Some(pk), Some(sig)) = (tx.public_key.as_ref(), tx.signature.as_ref()) else {
        return Ok(false);
    };
    if address_from_public_key(pk) != from {
        return Ok(false);
    }
    verify(pk, &txid(tx), sig)
}
