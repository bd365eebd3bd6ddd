//! A thread pool used to offload CPU-bound work (signature
//! verification, digest hashing) off the async runtime's reactor
//! threads, so a burst of client requests never stalls I/O (spec §5:
//! "the protocol engine's single actor must never block on CPU-bound
//! work").

use threadpool_crossbeam_channel as tp;

/// A handle to a running thread pool.
pub struct ThreadPool {
    inner: tp::ThreadPool,
}

/// Builds a `ThreadPool`.
pub struct Builder {
    inner: tp::Builder,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            inner: tp::Builder::new(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.inner = self.inner.num_threads(n);
        self
    }

    pub fn thread_name(mut self, name: String) -> Self {
        self.inner = self.inner.thread_name(name);
        self
    }

    pub fn build(self) -> ThreadPool {
        ThreadPool {
            inner: self.inner.build(),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Submits `job` for execution on a worker thread.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.execute(job)
    }

    /// The number of worker threads in this pool.
    pub fn max_count(&self) -> usize {
        self.inner.max_count()
    }

    /// Blocks until every currently queued job has finished.
    pub fn join(&self) {
        self.inner.join()
    }
}

impl Clone for ThreadPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
