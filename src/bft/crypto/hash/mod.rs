//! Request digests: spec §3's `d(m)`, a collision-resistant hash of
//! the triple `(client_id, client_ts, payload)` identifying a client
//! request uniquely. Two requests are equal iff their digests match.

#[cfg(feature = "crypto_hash_blake3_blake3")]
mod blake3_blake3;

#[cfg(feature = "crypto_hash_blake3_blake3")]
pub use blake3_blake3::{Context, Digest};
