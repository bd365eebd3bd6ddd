//! Cluster configuration (spec §6): the parameters a replica needs at
//! bootstrap, validated before anything else runs.

use std::net::SocketAddr;
use std::time::Duration;

use crate::bft::collections::HashMap;
use crate::bft::communication::NodeId;
use crate::bft::crypto::signature::{KeyPair, PublicKey};
use crate::bft::error::*;

/// The static membership and fault-tolerance parameters of a cluster
/// (spec §3: `n = 3f + 1`).
pub struct ClusterConfig {
    /// This replica's id.
    pub id: NodeId,
    /// The maximum number of faulty replicas tolerated.
    pub f: usize,
    /// Every replica's network address, including this one.
    pub addrs: std::collections::HashMap<NodeId, SocketAddr>,
    /// Every replica's public key, including this one.
    pub pk: HashMap<NodeId, PublicKey>,
    /// This replica's secret key.
    pub sk: KeyPair,
    /// How long a client waits for `f+1` matching replies before
    /// resubmitting a request (spec §6 `client_timeout_ms`).
    pub client_timeout: Duration,
    /// How long a replica waits without committing a new sequence
    /// number before considering the primary unresponsive (spec §6
    /// `replica_progress_timeout_ms`). Only consumed by the
    /// declared view-change extension point (`bft::sync`).
    pub replica_progress_timeout: Duration,
}

impl ClusterConfig {
    /// The total number of replicas, `n = 3f + 1`.
    pub fn n(&self) -> usize {
        self.addrs.len()
    }

    /// Validates this configuration against spec §3's invariants.
    /// Returns `Err(ErrorKind::Config)` on violation (spec §6 exit
    /// code 1, "invalid configuration").
    pub fn validate(&self) -> Result<()> {
        let n = self.n();
        if n != 3 * self.f + 1 {
            return Err(format!(
                "invalid cluster size: n={} must equal 3f+1 for f={}",
                n, self.f
            ))
            .wrapped(ErrorKind::Config);
        }
        if usize::from(self.id) >= n {
            return Err("replica id out of range").wrapped(ErrorKind::Config);
        }
        if !self.addrs.contains_key(&self.id) {
            return Err("no address configured for this replica's own id")
                .wrapped(ErrorKind::Config);
        }
        for id in self.addrs.keys() {
            if !self.pk.contains_key(id) {
                return Err("missing public key for a configured peer")
                    .wrapped(ErrorKind::Config);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::crypto::signature::KeyPair;

    fn config(n: usize, f: usize, id: NodeId) -> ClusterConfig {
        let sk = KeyPair::generate().unwrap();
        let mut addrs = std::collections::HashMap::new();
        let mut pk = crate::bft::collections::hash_map();
        for i in 0..n as u32 {
            let peer = NodeId::from(i);
            addrs.insert(peer, format!("127.0.0.1:{}", 20000 + i).parse().unwrap());
            pk.insert(peer, sk.public_key());
        }
        ClusterConfig {
            id,
            f,
            addrs,
            pk,
            sk,
            client_timeout: Duration::from_secs(1),
            replica_progress_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn n_equal_to_3f_plus_1_is_accepted() {
        assert!(config(4, 1, NodeId::from(0u32)).validate().is_ok());
    }

    #[test]
    fn n_equal_to_3f_is_rejected() {
        let err = config(3, 1, NodeId::from(0u32)).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn id_out_of_range_is_rejected() {
        let err = config(4, 1, NodeId::from(9u32)).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_self_address_is_rejected() {
        let mut cfg = config(4, 1, NodeId::from(0u32));
        cfg.addrs.remove(&NodeId::from(0u32));
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
