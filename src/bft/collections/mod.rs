//! Aliases over the collection types used throughout the crate.
//!
//! Swapping the hasher used by `HashMap`/`HashSet` is a single-point
//! change, gated by the `collections_randomstate_*` feature flags,
//! mirroring the pluggable-backend pattern used for the async runtime,
//! transport socket and crypto primitives elsewhere in this crate.

use linked_hash_map::LinkedHashMap;

#[cfg(feature = "collections_randomstate_twox_hash")]
type RandomState = std::hash::BuildHasherDefault<twox_hash::XxHash64>;

#[cfg(feature = "collections_randomstate_std")]
type RandomState = std::collections::hash_map::RandomState;

/// A `HashMap`, keyed by the configured `RandomState`.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashSet`, keyed by the configured `RandomState`.
pub type HashSet<K> = std::collections::HashSet<K, RandomState>;

/// A map preserving insertion order, used by the request log to hand
/// out the oldest pending client request first (spec §4.2's FIFO
/// behavior for forwarded requests).
pub type OrderedMap<K, V> = LinkedHashMap<K, V>;

/// Creates an empty `HashMap` with space for at least `capacity`
/// elements before it must reallocate.
pub fn hash_map_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, Default::default())
}

/// Creates an empty `HashMap`.
pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::default()
}

/// Creates an empty `HashSet`.
pub fn hash_set<K>() -> HashSet<K> {
    HashSet::default()
}

/// Creates an empty `OrderedMap`.
pub fn ordered_map<K, V>() -> OrderedMap<K, V> {
    LinkedHashMap::new()
}
