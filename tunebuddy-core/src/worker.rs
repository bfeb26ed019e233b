//! Background loop shared by the streaming stages.
//!
//! A worker owns one [`Stage`] on a dedicated thread and drives it until it
//! is told to shut down. Stopping is cooperative: the loop checks the
//! shutdown channel on every iteration, and [`Worker::stop`] joins the
//! thread, so nothing is still writing once it returns.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// How long an idle stage waits for more input before polling again.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(2);

/// Outcome of one pass over a stage.
#[derive(Debug)]
pub enum Tick {
    /// One frame was consumed and produced output.
    Processed,
    /// One frame was consumed but could not be used.
    Skipped(Error),
    /// Not enough input buffered yet.
    Idle,
}

/// One step of a streaming pipeline.
pub trait Stage: Send + 'static {
    /// Consumes at most one frame.
    fn tick(&mut self) -> Tick;

    /// Runs once on the worker thread after the last tick.
    fn finish(&mut self) {}
}

/// Frame counters of a finished worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub skipped: u64,
}

/// Handle to a running stage thread.
#[derive(Debug)]
pub struct Worker {
    name: &'static str,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<WorkerStats>>,
}

impl Worker {
    /// Spawns `stage` on a named thread.
    pub fn spawn<S: Stage>(name: &'static str, mut stage: S) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let thread_handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            info!(worker = name, "worker started");
            let mut stats = WorkerStats::default();
            loop {
                match shutdown_rx.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                }
                match stage.tick() {
                    Tick::Processed => stats.processed += 1,
                    Tick::Skipped(e) => {
                        stats.skipped += 1;
                        warn!(worker = name, error = %e, "frame skipped");
                    }
                    Tick::Idle => match shutdown_rx.recv_timeout(IDLE_BACKOFF) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    },
                }
            }
            stage.finish();
            info!(
                worker = name,
                processed = stats.processed,
                skipped = stats.skipped,
                "worker stopped"
            );
            stats
        })?;

        Ok(Self {
            name,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the loop and waits for it to exit.
    pub fn stop(mut self) -> WorkerStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> WorkerStats {
        let Some(handle) = self.thread_handle.take() else {
            return WorkerStats::default();
        };
        // A full channel already holds a pending signal.
        let _ = self.shutdown_tx.try_send(());
        match handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!(worker = self.name, "worker thread panicked");
                WorkerStats::default()
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Countdown {
        remaining: usize,
        ticks: Arc<AtomicUsize>,
        finished: Arc<AtomicBool>,
    }

    impl Stage for Countdown {
        fn tick(&mut self) -> Tick {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            match self.remaining {
                0 => Tick::Idle,
                n if n % 2 == 0 => {
                    self.remaining -= 1;
                    Tick::Skipped(Error::EmptyFrame)
                }
                _ => {
                    self.remaining -= 1;
                    Tick::Processed
                }
            }
        }

        fn finish(&mut self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_joins_and_reports_counts() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let worker = Worker::spawn(
            "countdown",
            Countdown {
                remaining: 10,
                ticks: Arc::clone(&ticks),
                finished: Arc::clone(&finished),
            },
        )
        .unwrap();
        while ticks.load(Ordering::SeqCst) < 12 {
            thread::sleep(Duration::from_millis(1));
        }
        let stats = worker.stop();
        assert_eq!(stats, WorkerStats { processed: 5, skipped: 5 });
        assert!(finished.load(Ordering::SeqCst));

        // Nothing ticks after stop returns.
        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn dropping_a_worker_stops_it() {
        let finished = Arc::new(AtomicBool::new(false));
        let worker = Worker::spawn(
            "dropped",
            Countdown {
                remaining: 0,
                ticks: Arc::new(AtomicUsize::new(0)),
                finished: Arc::clone(&finished),
            },
        )
        .unwrap();
        drop(worker);
        assert!(finished.load(Ordering::SeqCst));
    }
}
