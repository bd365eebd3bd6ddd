//! The transport adapter's concrete socket backend (spec §4.4).
//!
//! Only one backend is compiled at a time, selected by the
//! `socket_*` feature flags; `socket_tokio_tcp` is the only one
//! carried from the teacher crate (the async-std and io_uring/rio
//! backends had no counterpart in this spec and were dropped, see
//! DESIGN.md).

#[cfg(feature = "socket_tokio_tcp")]
mod tokio_tcp;

#[cfg(feature = "socket_tokio_tcp")]
pub use tokio_tcp::{bind, connect, Listener, Socket};

use crate::bft::error::*;

/// Readies the socket backend for use. A no-op for the plain TCP
/// backend, kept so swapping in a backend with real global setup
/// (e.g. io_uring's shared ring) only touches this module.
pub fn init() -> Result<()> {
    Ok(())
}

/// Tears down the socket backend.
pub fn drop() -> Result<()> {
    Ok(())
}
