//! Periodic flushing and background flush tracking.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, tick, Sender};
use crossbeam_utils::sync::WaitGroup;
use parking_lot::Mutex;
use tracing::{debug, error};

use super::engine::Engine;
use crate::error::BulkError;

/// Tracks background flush threads so shutdown can wait for them.
///
/// Once closed, no new background work is accepted.
pub(crate) struct InFlight {
    group: Mutex<Option<WaitGroup>>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self {
            group: Mutex::new(Some(WaitGroup::new())),
        }
    }
}

impl InFlight {
    /// Run `task` on a new tracked thread. Returns `false` if tracking has
    /// been closed or the thread could not be spawned.
    pub(crate) fn spawn<F>(&self, name: &str, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let group = self.group.lock();
        let Some(token) = group.as_ref().map(WaitGroup::clone) else {
            debug!(name, "background work refused after shutdown");
            return false;
        };

        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            task();
            drop(token);
        });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                error!(name, error = %e, "failed to spawn background flush");
                false
            },
        }
    }

    /// Stop accepting work and block until every tracked thread finishes.
    pub(crate) fn close_and_wait(&self) {
        let group = self.group.lock().take();
        if let Some(group) = group {
            group.wait();
        }
    }
}

/// Handle to the periodic flush thread.
#[derive(Default)]
pub(crate) struct Scheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) const fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Start ticking every `flush_interval`. Each tick flushes on its own
    /// tracked thread so a slow flush never holds up the next tick.
    pub(crate) fn start(&mut self, engine: &Arc<Engine>) -> Result<(), BulkError> {
        if engine.is_terminated() {
            return Err(BulkError::Stopped);
        }
        if self.is_active() {
            return Err(BulkError::AlreadyRunning);
        }

        let interval = engine.config.flush_interval;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let engine = Arc::clone(engine);

        let handle = thread::Builder::new()
            .name("bulkq-scheduler".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let tick_engine = Arc::clone(&engine);
                            engine.in_flight.spawn("bulkq-interval", move || {
                                tick_engine.background_flush("interval");
                            });
                        },
                    }
                }
                debug!("scheduler stopped");
            })?;

        debug!(?interval, "scheduler started");
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Signal the timer thread to exit and wait for it.
    pub(crate) fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel and ends the loop.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}
