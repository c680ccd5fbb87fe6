//! Progress reporting for long-running reconstruction phases
//!
//! Phases report through a [`ProgressSink`]. Cancellation is coarse: the
//! pipeline asks [`ProgressSink::should_cancel`] between phases, never inside one.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

/// Progress events emitted during reconstruction
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressMsg {
    /// A pipeline phase is starting
    Phase { name: &'static str },

    /// Iteration status of the sparse solver
    SolverIteration { iter: usize, residual: f64, progress: f64 },

    /// Number of lattice z-planes evaluated so far
    Lattice { planes_done: usize, planes_total: usize },

    /// Isosurface extraction finished a slab of cells
    Extraction { slabs_done: usize, slabs_total: usize },
}

/// Consumer of progress messages
pub trait ProgressSink: Send + Sync + Debug {
    fn emit(&self, msg: ProgressMsg);

    /// Polled between phases; returning `true` aborts the reconstruction
    fn should_cancel(&self) -> bool {
        false
    }
}

/// Sink that forwards every message to `tracing` at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, msg: ProgressMsg) {
        match msg {
            ProgressMsg::Phase { name } => tracing::debug!(phase = name, "phase started"),
            ProgressMsg::SolverIteration { iter, residual, progress } => {
                tracing::trace!(iter, residual, progress, "solver iteration")
            }
            ProgressMsg::Lattice { planes_done, planes_total } => {
                tracing::trace!(planes_done, planes_total, "lattice planes evaluated")
            }
            ProgressMsg::Extraction { slabs_done, slabs_total } => {
                tracing::trace!(slabs_done, slabs_total, "extraction slabs processed")
            }
        }
    }
}

/// Sink that forwards messages over a channel to a handler thread
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::SyncSender<ProgressMsg>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressSink for ChannelSink {
    #[inline]
    fn emit(&self, msg: ProgressMsg) {
        // A full buffer drops the message rather than stalling a worker
        let _ = self.tx.try_send(msg);
    }

    fn should_cancel(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Handle that lets the owner of a [`channel_sink`] request cancellation
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Spawn a listener thread running `handler` for each progress message.
///
/// The thread exits once every clone of the returned sink has been dropped.
pub fn channel_sink<F>(
    buffer: usize,
    mut handler: F,
) -> (Arc<dyn ProgressSink>, CancelHandle, thread::JoinHandle<()>)
where
    F: FnMut(ProgressMsg) + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<ProgressMsg>(buffer.max(1));
    let cancelled = Arc::new(AtomicBool::new(false));
    let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink {
        tx,
        cancelled: cancelled.clone(),
    });

    let handle = thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            handler(msg);
        }
    });

    (sink, CancelHandle(cancelled), handle)
}

/// Thread-safe counter for work items completed by parallel workers
#[derive(Debug)]
pub(crate) struct PlaneCounter<'a> {
    done: AtomicUsize,
    total: usize,
    sink: Option<&'a dyn ProgressSink>,
}

impl<'a> PlaneCounter<'a> {
    pub(crate) fn new(total: usize, sink: Option<&'a dyn ProgressSink>) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            sink,
        }
    }

    /// Record one finished item and report the running total
    pub(crate) fn tick<F>(&self, msg: F)
    where
        F: FnOnce(usize, usize) -> ProgressMsg,
    {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(sink) = self.sink {
            sink.emit(msg(done, self.total));
        }
    }

    pub(crate) fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

/// Fraction of the way from `start_res` to `target_res` on a log scale, in `[0, 1]`
#[inline]
pub(crate) fn progress_from_residual(current_res: f64, start_res: f64, target_res: f64) -> f64 {
    if current_res <= target_res {
        1.0
    } else if start_res <= target_res || current_res >= start_res {
        0.0
    } else {
        (start_res.log10() - current_res.log10()) / (start_res.log10() - target_res.log10())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<ProgressMsg>>);

    impl ProgressSink for Recorder {
        fn emit(&self, msg: ProgressMsg) {
            self.0.lock().unwrap().push(msg);
        }
    }

    #[test]
    fn test_plane_counter_reports_running_total() {
        let recorder = Recorder::default();
        let counter = PlaneCounter::new(3, Some(&recorder));
        for _ in 0..3 {
            counter.tick(|planes_done, planes_total| ProgressMsg::Lattice {
                planes_done,
                planes_total,
            });
        }
        assert_eq!(counter.done(), 3);

        let messages = recorder.0.lock().unwrap();
        assert_eq!(
            messages.last(),
            Some(&ProgressMsg::Lattice { planes_done: 3, planes_total: 3 })
        );
    }

    #[test]
    fn test_channel_sink_delivers_and_cancels() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let store = received.clone();
        let (sink, cancel, handle) = channel_sink(16, move |msg| store.lock().unwrap().push(msg));

        sink.emit(ProgressMsg::Phase { name: "fit" });
        assert!(!sink.should_cancel());
        cancel.cancel();
        assert!(sink.should_cancel());

        drop(sink);
        handle.join().unwrap();
        assert_eq!(*received.lock().unwrap(), vec![ProgressMsg::Phase { name: "fit" }]);
    }

    #[test]
    fn test_progress_from_residual() {
        assert_eq!(progress_from_residual(1e-13, 1.0, 1e-12), 1.0);
        assert_eq!(progress_from_residual(2.0, 1.0, 1e-12), 0.0);
        let halfway = progress_from_residual(1e-6, 1.0, 1e-12);
        assert!((halfway - 0.5).abs() < 1e-12);
    }
}
