use crate::bft::error::*;

/// An incremental hasher producing a `Digest`.
pub struct Context(blake3::Hasher);

/// A collision-resistant hash of a client request (spec §3 `d(m)`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(
    feature = "serialize_serde",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Digest([u8; Digest::LENGTH]);

impl Context {
    /// Creates a new, empty hashing context.
    pub fn new() -> Self {
        Context(blake3::Hasher::new())
    }

    /// Feeds more bytes into the running hash.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.0.update(data);
        self
    }

    /// Consumes the context, producing the final `Digest`.
    pub fn finish(self) -> Digest {
        let hash = self.0.finalize();
        Digest(*hash.as_bytes())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Digest {
    /// The length, in bytes, of a `Digest`.
    pub const LENGTH: usize = 32;

    /// Hashes `raw_bytes` in one shot.
    pub fn from_data(raw_bytes: &[u8]) -> Self {
        let mut ctx = Context::new();
        ctx.update(raw_bytes);
        ctx.finish()
    }

    /// Reinterprets an existing byte buffer as a `Digest`, without
    /// re-hashing it. Used when deserializing a digest off the wire.
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("Digest has an invalid length").wrapped(ErrorKind::CryptoHash);
        }
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Ok(Digest(inner))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_digest() {
        let a = Digest::from_data(b"hello");
        let b = Digest::from_data(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_different_digest() {
        let a = Digest::from_data(b"hello");
        let b = Digest::from_data(b"world");
        assert_ne!(a, b);
    }
}
