//! Cryptographic primitives: request digests (`hash`) and the
//! authenticator used to sign/verify inter-replica messages
//! (`signature`).
//!
//! Spec §4.1 allows the authenticator to be "modeled abstractly" —
//! this crate picks digital signatures over a MAC vector (both are
//! declared compatible), backed by `ring`'s Ed25519 implementation,
//! matching the teacher's own default feature selection.

pub mod hash;
pub mod signature;
