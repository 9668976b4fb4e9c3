//! One-shot start guard for the dispatch loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;

/// Owns the process's dispatch loop.
///
/// Built once by the composition root and handed to every code path that may
/// want to start the worker. The first [`start`](Self::start) spawns the loop;
/// every later call is a no-op. The latch is never reset, not even by
/// [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct JobProcessor {
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    started: AtomicBool,
    loops_spawned: AtomicUsize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobProcessor {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            loops_spawned: AtomicUsize::new(0),
            handle: Mutex::new(None),
        }
    }

    /// Start the dispatch loop unless it was already started.
    ///
    /// Returns `true` only for the call that actually spawned it. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(dispatcher = %self.dispatcher.config().name, "job processor already started");
            return false;
        }

        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move { dispatcher.run(cancel).await });

        self.loops_spawned.fetch_add(1, Ordering::SeqCst);
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(dispatcher = %self.dispatcher.config().name, "job processor started");
        true
    }

    /// Whether the loop was started and has not exited.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
            && self
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }

    /// Number of loops ever spawned by this processor (0 or 1).
    pub fn loops_spawned(&self) -> usize {
        self.loops_spawned.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A job that is being handled is finished and recorded first. After
    /// shutdown, `start` is a no-op.
    pub async fn shutdown(&self) {
        self.started.store(true, Ordering::Release);
        self.cancel.cancel();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(
                    dispatcher = %self.dispatcher.config().name,
                    error = %e,
                    "job dispatcher task failed"
                );
            }
        }
    }
}
