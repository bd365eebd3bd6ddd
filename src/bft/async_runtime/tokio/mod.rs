use std::future::Future;
use std::sync::OnceLock;

pub type JoinHandle<T> = ::tokio::task::JoinHandle<T>;
pub type Runtime = ::tokio::runtime::Runtime;

static HANDLE: OnceLock<::tokio::runtime::Handle> = OnceLock::new();

pub fn init(num_threads: usize) -> Result<Runtime, ()> {
    let runtime = ::tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads)
        .thread_name("synod-worker")
        .thread_stack_size(2 * 1024 * 1024)
        .enable_all()
        .build()
        .map_err(|_| ())?;
    // ignore failure: a second `init()` call is a no-op by design,
    // guarded by `bft::INITIALIZED` one level up
    let _ = HANDLE.set(runtime.handle().clone());
    Ok(runtime)
}

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    HANDLE
        .get()
        .expect("async runtime not initialized")
        .spawn(future)
}

pub fn block_on<F: Future>(future: F) -> F::Output {
    HANDLE
        .get()
        .expect("async runtime not initialized")
        .block_on(future)
}
