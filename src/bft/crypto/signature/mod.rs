//! The message authenticator (spec §4.1): every inter-replica message
//! carries one, and a replica must be able to verify it against the
//! claimed sender before acting on the message.
//!
//! This is the one place spec §4.1 explicitly allows "a no-op verifier
//! in simulation mode" — see `Authenticator::noop` — while still
//! keeping the real verification path available so Byzantine-message
//! tests (spec §9 "Byzantine testing hooks") can inject forgeries and
//! observe rejection.

#[cfg(feature = "crypto_signature_ring_ed25519")]
mod ring_ed25519;

#[cfg(feature = "crypto_signature_ring_ed25519")]
pub use ring_ed25519::{KeyPair, PublicKey, Signature};

use crate::bft::communication::NodeId;
use crate::bft::error::*;

/// Verifies and produces authenticators for messages exchanged between
/// a fixed set of replicas.
///
/// A real `Authenticator` signs with this replica's `KeyPair` and
/// verifies against the claimed sender's `PublicKey`. A `noop`
/// authenticator always signs with a sentinel value and always
/// verifies successfully, standing in for "signatures may be modeled
/// abstractly" (spec §4.1) in tests that don't care about
/// cryptographic correctness.
pub enum Authenticator {
    Real { id: NodeId, key: KeyPair, peers: crate::bft::collections::HashMap<NodeId, PublicKey> },
    Noop,
}

impl Authenticator {
    /// Builds a real authenticator for replica `id`, given its secret
    /// key and the public keys of every peer (including itself).
    pub fn new(
        id: NodeId,
        key: KeyPair,
        peers: crate::bft::collections::HashMap<NodeId, PublicKey>,
    ) -> Self {
        Authenticator::Real { id, key, peers }
    }

    /// Builds a no-op authenticator: everything signs to a sentinel
    /// value and every signature verifies, used by in-process
    /// simulation tests that don't exercise the crypto path.
    pub fn noop() -> Self {
        Authenticator::Noop
    }

    /// Signs `data`, producing the authenticator to attach to an
    /// outbound message.
    pub fn sign(&self, data: &[u8]) -> Signature {
        match self {
            Authenticator::Real { key, .. } => key.sign(data),
            Authenticator::Noop => Signature::zeroed(),
        }
    }

    /// Verifies that `sig` is a valid authenticator for `data`, as
    /// produced by `claimed_sender`.
    ///
    /// Returns `Err(AuthFailure)` on mismatch; callers must drop the
    /// message silently and only bump a rejection counter (spec
    /// §4.1's "messages with mismatched `(sender_id, authenticator)`
    /// are dropped silently").
    pub fn verify(&self, claimed_sender: NodeId, data: &[u8], sig: &Signature) -> Result<()> {
        match self {
            Authenticator::Noop => Ok(()),
            Authenticator::Real { peers, .. } => {
                let pk = peers
                    .get(&claimed_sender)
                    .ok_or(()) // unknown sender id
                    .simple(ErrorKind::AuthFailure)?;
                pk.verify(data, sig).simple(ErrorKind::AuthFailure)
            }
        }
    }
}
