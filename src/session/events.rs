use std::ops::Range;
use std::sync::Mutex;

/// Why a worker left its loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// Every unit in the chunk was attempted.
    Completed,
    /// The keep-running flag was cleared.
    Cancelled,
    /// A unit failed and the rest of the chunk was abandoned.
    Failed,
}

/// Messages pushed by workers onto the aggregator channel.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// One row (direct) or one sheet (imposition) was written.
    UnitDone {
        worker: usize,
        /// Plan position of the unit, used to order outputs.
        unit: usize,
        /// Cards covered by the unit: 1 in direct mode, the page size otherwise.
        cards: usize,
        filename: String,
    },
    /// A unit failed. When `fatal`, the worker abandons the rest of its chunk.
    Failed {
        worker: usize,
        chunk: Range<usize>,
        filename: String,
        message: String,
        fatal: bool,
    },
    Log {
        worker: usize,
        message: String,
    },
    /// Always the last event a worker sends.
    Exited {
        worker: usize,
        completed: usize,
        reason: ExitReason,
    },
}

/// Receives run progress. Called from a single aggregator thread, in event order.
///
/// All methods default to no-ops so observers implement only what they need.
pub trait RenderObserver: Send + Sync {
    /// Percentage of cards done, 0..=100, non-decreasing within a run.
    fn progress(&self, _percent: u8) {}
    fn log(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    /// Terminal notification, sent once per run after every worker exited.
    fn finished(&self) {}
}

/// Forwards the log and error channels to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl RenderObserver for TracingObserver {
    fn progress(&self, percent: u8) {
        tracing::debug!(percent, "progress");
    }

    fn log(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn finished(&self) {
        tracing::info!("run finished");
    }
}

/// Snapshot of everything a [`CollectingObserver`] saw.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collected {
    pub progress: Vec<u8>,
    pub logs: Vec<String>,
    pub errors: Vec<String>,
    pub finished: usize,
}

/// Records every notification in memory, for tests and debugging.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    inner: Mutex<Collected>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Collected {
        self.with(|c| c.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Collected) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl RenderObserver for CollectingObserver {
    fn progress(&self, percent: u8) {
        self.with(|c| c.progress.push(percent));
    }

    fn log(&self, message: &str) {
        self.with(|c| c.logs.push(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.with(|c| c.errors.push(message.to_string()));
    }

    fn finished(&self) {
        self.with(|c| c.finished += 1);
    }
}
