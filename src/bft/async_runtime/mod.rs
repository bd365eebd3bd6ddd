//! The async runtime backend (spec §5): only one backend is compiled
//! at a time, selected by the `async_runtime_*` feature flags.

#[cfg(feature = "async_runtime_tokio")]
mod tokio;

#[cfg(feature = "async_runtime_tokio")]
use self::tokio as backend;

use std::cell::RefCell;
use std::future::Future;

use crate::bft::error::*;

pub use backend::JoinHandle;

thread_local! {
    static RUNTIME: RefCell<Option<backend::Runtime>> = RefCell::new(None);
}

/// Initializes the global async runtime with `num_threads` worker
/// threads. Should be called once, before `init()` returns (see
/// `bft::init`).
pub fn init(num_threads: usize) -> Result<()> {
    let runtime = backend::init(num_threads).simple(ErrorKind::Core)?;
    RUNTIME.with(|cell| *cell.borrow_mut() = Some(runtime));
    Ok(())
}

/// Tears down the global async runtime.
pub fn drop() -> Result<()> {
    RUNTIME.with(|cell| *cell.borrow_mut() = None);
    Ok(())
}

/// Spawns `future` onto the global async runtime.
///
/// Because this crate's replica binary drives the runtime with a
/// single `block_on`, `tokio::spawn` (called from inside that
/// context) is enough here; we don't need to reach back into a
/// thread-local handle.
pub fn spawn<F>(future: F) -> backend::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    backend::spawn(future)
}

/// Blocks the current thread until `future` completes, driving the
/// global async runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    backend::block_on(future)
}
