//! `synod` is a library implementing a Byzantine Fault Tolerant state
//! machine replication protocol, loosely based on PBFT.
//!
//! A cluster of `n = 3f + 1` replicas agrees on a single, totally
//! ordered sequence of client requests even when up to `f` replicas
//! behave arbitrarily, by running a three-phase `PRE-PREPARE` /
//! `PREPARE` / `COMMIT` agreement protocol per request.
//!
//! The `bft` module tree is hidden behind the `expose_impl` feature;
//! by default only the re-exports below are public.

#[cfg(feature = "expose_impl")]
pub mod bft;

#[cfg(not(feature = "expose_impl"))]
mod bft;

pub use crate::bft::communication::message::{ClientId, Timestamp};
pub use crate::bft::communication::serialize::{BincodeData, SharedData};
pub use crate::bft::communication::NodeId;
pub use crate::bft::config::ClusterConfig;
pub use crate::bft::core::server::{Replica, ViewInfo};
pub use crate::bft::crypto::signature::{KeyPair, PublicKey};
pub use crate::bft::error::{Error, ErrorKind, Result};
pub use crate::bft::executable::{Reply, Request, Service, State};
pub use crate::bft::observer::{ObserverCommand, ObserverHandle, ObserverResponse, StatusMessage};
pub use crate::bft::{init, InitConfig, InitGuard};
