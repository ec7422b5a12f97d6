//! Periodic background workers.
//!
//! Every maintenance loop in the engine (TTL sweep, checkpointer, cold
//! eviction, compaction, transaction GC) is a [`PeriodicWorker`]: a named
//! thread that runs a tick closure on an interval, owns its shutdown
//! signal, and joins deterministically on stop. Shutdown interrupts the
//! wait immediately, so a worker never sleeps through its own stop signal.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

struct Signal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

/// A named thread running a closure on a fixed interval.
pub struct PeriodicWorker {
    name: String,
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    /// Spawn a worker that runs `tick` every `interval`.
    ///
    /// The first tick happens after one full interval, not immediately.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        });

        let thread_signal = Arc::clone(&signal);
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(worker = %thread_name, "background worker started");
                loop {
                    {
                        let mut stopped = thread_signal.stopped.lock();
                        if !*stopped {
                            thread_signal.condvar.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    tick();
                }
                debug!(worker = %thread_name, "background worker stopped");
            })
            .expect("failed to spawn background worker thread");

        PeriodicWorker {
            name: name.to_string(),
            signal,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and join it. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            if *stopped {
                return;
            }
            *stopped = true;
            self.signal.condvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// The worker's thread name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
