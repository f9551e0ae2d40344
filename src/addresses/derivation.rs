//! Deterministic address derivation from a wallet seed
//!
//! Child key material for index `i` is `SHA-256(domain || seed || i_be)`,
//! interpreted as an ed25519 secret key. The address hash is the base58
//! encoding of the public key, so the same seed always yields the same
//! address sequence and a restore needs nothing but the seed.

use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

const DERIVATION_DOMAIN: &[u8] = b"walletsync/hd-address/v1";

/// Wallet seed bytes; never printed
#[derive(Clone)]
pub struct WalletSeed(Vec<u8>);

impl WalletSeed {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(hex_seed: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(hex_seed.trim()).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for WalletSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WalletSeed(<{} bytes redacted>)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub hash: String,
    pub index: u32,
    pub group: u8,
}

/// Maps `(seed, index)` to an address; must be pure and deterministic
pub trait AddressDeriver: Send + Sync {
    fn derive(&self, seed: &WalletSeed, index: u32) -> DerivedAddress;
}

#[derive(Debug, Clone)]
pub struct Ed25519Deriver {
    group_count: u8,
}

impl Ed25519Deriver {
    pub fn new(group_count: u8) -> Self {
        Self {
            group_count: group_count.max(1),
        }
    }
}

impl Default for Ed25519Deriver {
    fn default() -> Self {
        Self::new(4)
    }
}

impl AddressDeriver for Ed25519Deriver {
    fn derive(&self, seed: &WalletSeed, index: u32) -> DerivedAddress {
        let mut hasher = Sha256::new();
        hasher.update(DERIVATION_DOMAIN);
        hasher.update(seed.as_bytes());
        hasher.update(index.to_be_bytes());
        let secret: [u8; 32] = hasher.finalize().into();

        let public = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
        let group = public[31] % self.group_count;

        DerivedAddress {
            hash: bs58::encode(public).into_string(),
            index,
            group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_index_sensitive() {
        let deriver = Ed25519Deriver::default();
        let seed = WalletSeed::new(vec![7u8; 32]);

        let a0 = deriver.derive(&seed, 0);
        let a0_again = deriver.derive(&seed, 0);
        let a1 = deriver.derive(&seed, 1);

        assert_eq!(a0, a0_again);
        assert_ne!(a0.hash, a1.hash);
        assert!(a0.group < 4);
    }

    #[test]
    fn different_seeds_give_different_addresses() {
        let deriver = Ed25519Deriver::default();
        let a = deriver.derive(&WalletSeed::new(vec![1u8; 32]), 0);
        let b = deriver.derive(&WalletSeed::new(vec![2u8; 32]), 0);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn seed_debug_output_is_redacted() {
        let seed = WalletSeed::from_hex("deadbeef").unwrap();
        assert_eq!(format!("{:?}", seed), "WalletSeed(<4 bytes redacted>)");
    }
}
