use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair as _};

use crate::bft::error::*;

/// A signature produced by a replica's `KeyPair`, attached to every
/// outbound message as its authenticator.
#[derive(Clone)]
#[cfg_attr(
    feature = "serialize_serde",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Signature(#[cfg_attr(feature = "serialize_serde", serde(with = "serde_bytes"))] Vec<u8>);

impl Signature {
    /// The length, in bytes, of an Ed25519 signature.
    pub const LENGTH: usize = 64;

    /// An all-zero signature, produced by the no-op authenticator.
    pub fn zeroed() -> Self {
        Signature(vec![0; Self::LENGTH])
    }

    /// Reinterprets a byte buffer as a `Signature`.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() != Self::LENGTH {
            return Err("Signature has an invalid length").wrapped(ErrorKind::CryptoSignature);
        }
        Ok(Signature(raw_bytes.to_vec()))
    }

    /// Returns the raw bytes of this signature.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

/// A replica's public key, used to verify signatures produced by its
/// `KeyPair`.
#[derive(Clone)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn verify(&self, data: &[u8], sig: &Signature) -> std::result::Result<(), ()> {
        let pk = signature::UnparsedPublicKey::new(&signature::ED25519, &self.0[..]);
        pk.verify(data, &sig.0[..]).map_err(|_| ())
    }
}

/// A replica's secret/public key pair, used to sign outbound messages.
pub struct KeyPair(Ed25519KeyPair);

impl KeyPair {
    /// Generates a fresh key pair.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .simple(ErrorKind::CryptoSignature)?;
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .simple(ErrorKind::CryptoSignature)?;
        Ok(KeyPair(kp))
    }

    /// Loads a key pair from its raw PKCS#8 document bytes.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        let kp = Ed25519KeyPair::from_pkcs8(raw_bytes).simple(ErrorKind::CryptoSignature)?;
        Ok(KeyPair(kp))
    }

    /// Derives a key pair deterministically from a 32-byte seed.
    ///
    /// Used by the CLI (spec §6), where replicas have no out-of-band
    /// key distribution mechanism: every process derives every
    /// replica's identity key pair from its `NodeId` alone, so public
    /// keys never need to travel over the wire.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let kp = Ed25519KeyPair::from_seed_unchecked(seed).simple(ErrorKind::CryptoSignature)?;
        Ok(KeyPair(kp))
    }

    /// Returns this key pair's public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key().as_ref().to_vec())
    }

    /// Signs `data`.
    pub fn sign(&self, data: &[u8]) -> Signature {
        let sig = self.0.sign(data);
        Signature(sig.as_ref().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrip() {
        let kp = KeyPair::generate().unwrap();
        let pk = kp.public_key();
        let sig = kp.sign(b"hello");
        assert!(pk.verify(b"hello", &sig).is_ok());
    }

    #[test]
    fn tampered_data_fails_verification() {
        let kp = KeyPair::generate().unwrap();
        let pk = kp.public_key();
        let sig = kp.sign(b"hello");
        assert!(pk.verify(b"goodbye", &sig).is_err());
    }
}
