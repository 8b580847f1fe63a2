//! Named, cooperatively stoppable stream threads.
//!
//! Every producer and writer in a recording session runs on its own OS
//! thread. The loop body receives the stop flag and is expected to check it
//! at least once per poll interval; `stop()` raises the flag and joins,
//! handing back whatever the loop returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use avrec_core::error::{AppResult, AvError};

/// A long-lived thread with a stop flag.
pub struct StreamWorker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<AppResult<()>>>,
}

impl StreamWorker {
    /// Spawn `body` on a thread called `name`.
    ///
    /// A fatal error returned by `body` is logged on the worker thread and
    /// surfaced again by [`stop`](Self::stop) or [`join`](Self::join).
    pub fn spawn<F>(name: impl Into<String>, body: F) -> AppResult<Self>
    where
        F: FnOnce(&AtomicBool) -> AppResult<()> + Send + 'static,
    {
        let name = name.into();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let thread_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(worker = %thread_name, "Worker running");
            let result = body(&stop_for_thread);
            match &result {
                Ok(()) => debug!(worker = %thread_name, "Worker finished"),
                Err(e) => error!(worker = %thread_name, error = %e, "Worker stopped on error"),
            }
            result
        })?;

        info!(worker = %name, "Worker started");

        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// True once the thread has returned (normally or on error)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Raise the stop flag and wait for the thread.
    pub fn stop(mut self) -> AppResult<()> {
        info!(worker = %self.name, "Stopping worker");
        self.request_stop();
        let result = self.wait();
        debug!(worker = %self.name, "Worker stopped");
        result
    }

    /// Wait for the thread to return on its own.
    pub fn join(mut self) -> AppResult<()> {
        self.wait()
    }

    fn wait(&mut self) -> AppResult<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AvError::WorkerPanicked(self.name.clone()))?,
            None => Ok(()),
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            if let Err(e) = self.wait() {
                warn!(worker = %self.name, error = %e, "Worker failed during drop");
            }
        }
    }
}

impl std::fmt::Debug for StreamWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWorker")
            .field("name", &self.name)
            .field("stop_requested", &self.stop_requested())
            .field("finished", &self.is_finished())
            .finish()
    }
}
