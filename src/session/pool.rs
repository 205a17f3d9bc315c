use std::any::Any;
use std::ops::Range;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};

use crate::foundation::error::{CardError, CardResult};
use crate::imposition::assembler::SheetAssembler;
use crate::imposition::layout::SheetLayout;
use crate::plan::jobs::{PageJob, RenderJob, partition};
use crate::render::backend::{Renderer, write_png};
use crate::session::events::{ExitReason, WorkerEvent};

/// Cores left free for the UI and the OS in direct mode.
pub const RESERVED_CORES: usize = 2;

/// Sheets in flight hold a full page of decoded cards each, so imposition runs stay narrow.
pub const IMPOSITION_MAX_WORKERS: usize = 2;

pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `max(1, min(cores - 2, jobs))`.
pub fn direct_worker_count(cores: usize, jobs: usize) -> usize {
    cores.saturating_sub(RESERVED_CORES).min(jobs).max(1)
}

/// Direct-mode sizing further capped at `cap`, so imposition never runs wider than direct.
pub fn imposition_worker_count(cores: usize, cap: usize, pages: usize) -> usize {
    direct_worker_count(cores, pages).min(cap).max(1)
}

/// Shared, read-only inputs of one run's workers.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub renderer: Arc<dyn Renderer>,
    pub output_dir: Arc<PathBuf>,
    pub keep_running: Arc<AtomicBool>,
}

/// Work a pool executes: the whole plan, split by chunk at dispatch time.
#[derive(Clone)]
pub(crate) enum WorkSet {
    Direct(Arc<[RenderJob]>),
    Pages {
        pages: Arc<[PageJob]>,
        layout: SheetLayout,
    },
}

impl WorkSet {
    fn len(&self) -> usize {
        match self {
            Self::Direct(jobs) => jobs.len(),
            Self::Pages { pages, .. } => pages.len(),
        }
    }
}

/// Fixed-size pool where each worker owns one contiguous chunk of the plan.
///
/// There is no shared job queue: chunks are assigned at dispatch and never rebalanced.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> CardResult<Self> {
        if workers == 0 {
            return Err(CardError::validation("worker pool needs at least one worker"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cardpress-worker-{i}"))
            .panic_handler(|payload| {
                tracing::error!(panic = %panic_message(payload.as_ref()), "worker thread panicked");
            })
            .build()
            .map_err(|e| CardError::Other(anyhow::anyhow!("failed to build worker pool: {e}")))?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn one task per chunk and return the chunk ranges, in worker order.
    ///
    /// Every spawned worker sends exactly one [`WorkerEvent::Exited`] on `tx`.
    pub(crate) fn dispatch(
        &self,
        work: &WorkSet,
        shared: &WorkerShared,
        tx: &mpsc::Sender<WorkerEvent>,
    ) -> Vec<Range<usize>> {
        let chunks = partition(work.len(), self.workers);
        for (worker, chunk) in chunks.iter().cloned().enumerate() {
            let work = work.clone();
            let shared = shared.clone();
            let tx = tx.clone();
            tracing::debug!(worker, start = chunk.start, end = chunk.end, "dispatching chunk");
            self.pool.spawn(move || {
                let mut exit = ExitGuard::new(worker, tx);
                match work {
                    WorkSet::Direct(jobs) => run_direct_chunk(&shared, &jobs, chunk, &mut exit),
                    WorkSet::Pages { pages, layout } => {
                        run_page_chunk(&shared, &pages, layout, chunk, &mut exit)
                    }
                }
            });
        }
        chunks
    }
}

/// Sends `Exited` when the worker loop ends, including by unwinding.
struct ExitGuard {
    worker: usize,
    completed: usize,
    reason: ExitReason,
    tx: mpsc::Sender<WorkerEvent>,
}

impl ExitGuard {
    fn new(worker: usize, tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            worker,
            completed: 0,
            reason: ExitReason::Failed,
            tx,
        }
    }

    fn send(&self, event: WorkerEvent) {
        // The aggregator only hangs up after every worker exited.
        let _ = self.tx.send(event);
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerEvent::Exited {
            worker: self.worker,
            completed: self.completed,
            reason: self.reason,
        });
    }
}

fn should_stop(shared: &WorkerShared, exit: &mut ExitGuard, chunk: &Range<usize>) -> bool {
    if shared.keep_running.load(Ordering::Acquire) {
        return false;
    }
    exit.reason = ExitReason::Cancelled;
    exit.send(WorkerEvent::Log {
        worker: exit.worker,
        message: format!(
            "worker {} cancelled after {} of {} units",
            exit.worker,
            exit.completed,
            chunk.len()
        ),
    });
    true
}

fn run_direct_chunk(
    shared: &WorkerShared,
    jobs: &[RenderJob],
    chunk: Range<usize>,
    exit: &mut ExitGuard,
) {
    for unit in chunk.clone() {
        if should_stop(shared, exit, &chunk) {
            return;
        }
        let job = &jobs[unit];
        let path = shared.output_dir.join(&job.output_filename);

        if let Err(message) = guarded(|| shared.renderer.render_row(&job.row, &path)) {
            exit.send(WorkerEvent::Failed {
                worker: exit.worker,
                chunk: chunk.clone(),
                filename: job.output_filename.clone(),
                message,
                fatal: true,
            });
            return;
        }

        exit.completed += 1;
        exit.send(WorkerEvent::UnitDone {
            worker: exit.worker,
            unit,
            cards: 1,
            filename: job.output_filename.clone(),
        });
    }
    exit.reason = ExitReason::Completed;
}

fn run_page_chunk(
    shared: &WorkerShared,
    pages: &[PageJob],
    layout: SheetLayout,
    chunk: Range<usize>,
    exit: &mut ExitGuard,
) {
    let assembler = SheetAssembler::from_layout(layout);

    for unit in chunk.clone() {
        if should_stop(shared, exit, &chunk) {
            return;
        }
        let page = &pages[unit];

        let mut cards = Vec::with_capacity(page.cards.len());
        for job in &page.cards {
            match guarded(|| shared.renderer.render_to_image(&job.row)) {
                Ok(img) => cards.push(img),
                Err(message) => {
                    exit.send(WorkerEvent::Failed {
                        worker: exit.worker,
                        chunk: chunk.clone(),
                        filename: format!("{} ({})", page.output_filename, job.output_filename),
                        message,
                        fatal: true,
                    });
                    return;
                }
            }
        }

        let path = shared.output_dir.join(&page.output_filename);
        let saved = assembler
            .assemble(&cards)
            .and_then(|sheet| write_png(&sheet, &path));
        drop(cards);

        // A lost sheet does not abandon the rest of the chunk.
        if let Err(e) = saved {
            exit.send(WorkerEvent::Failed {
                worker: exit.worker,
                chunk: chunk.clone(),
                filename: page.output_filename.clone(),
                message: e.to_string(),
                fatal: false,
            });
            continue;
        }

        exit.completed += 1;
        exit.send(WorkerEvent::UnitDone {
            worker: exit.worker,
            unit,
            cards: page.cards.len(),
            filename: page.output_filename.clone(),
        });
    }
    exit.reason = ExitReason::Completed;
}

/// Run one renderer call, turning both errors and panics into a message.
fn guarded<T>(f: impl FnOnce() -> CardResult<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("renderer panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/pool.rs"]
mod tests;
