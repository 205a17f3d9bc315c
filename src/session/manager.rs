use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;

use crate::config::ImpositionSettings;
use crate::foundation::core::Row;
use crate::foundation::error::{CardError, CardResult};
use crate::imposition::layout::SheetSpec;
use crate::plan::jobs::{RunMode, RunPlan, plan_with_spec};
use crate::render::backend::Renderer;
use crate::session::events::{ExitReason, RenderObserver, TracingObserver, WorkerEvent};
use crate::session::pool::{
    IMPOSITION_MAX_WORKERS, WorkSet, WorkerPool, WorkerShared, available_cores,
    direct_worker_count, imposition_worker_count,
};

/// Lifecycle of one run. A manager never leaves a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Allocating names and pages.
    Planning,
    Running,
    /// Every worker exited on its own.
    Finished,
    /// Workers exited after `stop()`.
    Stopped,
    /// Planning failed; nothing was rendered.
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Failed)
    }
}

/// Pool sizing and sheet options.
#[derive(Clone, Debug)]
pub struct RenderManagerOpts {
    /// Upper bound on workers in direct mode. `None` uses cores minus two.
    pub max_workers: Option<usize>,
    /// Upper bound on workers in imposition mode.
    pub imposition_max_workers: usize,
    pub sheet: SheetSpec,
}

impl Default for RenderManagerOpts {
    fn default() -> Self {
        Self {
            max_workers: None,
            imposition_max_workers: IMPOSITION_MAX_WORKERS,
            sheet: SheetSpec::A4,
        }
    }
}

/// Outcome of a run, available once every worker exited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub state: RunState,
    pub mode: RunMode,
    pub workers: usize,
    pub total_cards: usize,
    pub cards_done: usize,
    /// Written outputs in plan order.
    pub files: Vec<PathBuf>,
    pub errors: Vec<String>,
    /// Outputs to hand to the printer, when the run asked for it.
    pub print_queue: Option<Vec<PathBuf>>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.state == RunState::Finished && self.errors.is_empty()
    }
}

/// Orchestrates one batch: plan, spin up workers, aggregate their events.
///
/// Observers are notified from a single aggregator thread, so progress values arrive in
/// order and never decrease.
pub struct RenderManager {
    renderer: Arc<dyn Renderer>,
    rows: Option<Vec<Row>>,
    output_dir: PathBuf,
    pattern: String,
    imposition: ImpositionSettings,
    opts: RenderManagerOpts,
    observer: Arc<dyn RenderObserver>,

    state: Arc<Mutex<RunState>>,
    keep_running: Arc<AtomicBool>,
    cards_done: Arc<AtomicUsize>,
    total_cards: usize,
    aggregator: Option<JoinHandle<RunSummary>>,
    summary: Option<RunSummary>,
}

impl RenderManager {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        rows: Vec<Row>,
        output_dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
        imposition: ImpositionSettings,
    ) -> Self {
        Self {
            renderer,
            rows: Some(rows),
            output_dir: output_dir.into(),
            pattern: pattern.into(),
            imposition,
            opts: RenderManagerOpts::default(),
            observer: Arc::new(TracingObserver),
            state: Arc::new(Mutex::new(RunState::Idle)),
            keep_running: Arc::new(AtomicBool::new(true)),
            cards_done: Arc::new(AtomicUsize::new(0)),
            total_cards: 0,
            aggregator: None,
            summary: None,
        }
    }

    pub fn with_opts(mut self, opts: RenderManagerOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RenderObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Cards finished so far and cards planned.
    pub fn progress_counts(&self) -> (usize, usize) {
        (self.cards_done.load(Ordering::Acquire), self.total_cards)
    }

    /// Plan the run and start the workers. Returns once they are running.
    ///
    /// Planning errors are reported on the error channel, leave the manager `Failed`, and
    /// are returned; no worker is started and nothing is written.
    pub fn start(&mut self) -> CardResult<()> {
        {
            let mut state = lock(&self.state);
            if *state != RunState::Idle {
                return Err(CardError::validation(format!(
                    "run cannot be started from state {:?}",
                    *state
                )));
            }
            *state = RunState::Planning;
        }

        let prepared = self.prepare();
        let (plan, pool) = match prepared {
            Ok(v) => v,
            Err(e) => {
                *lock(&self.state) = RunState::Failed;
                self.observer.error(&e.to_string());
                tracing::error!(error = %e, "planning failed");
                return Err(e);
            }
        };

        self.total_cards = plan.total_cards();
        let mode = plan.mode();
        let units = plan.work_units();
        let workers = pool.workers();

        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        let shared = WorkerShared {
            renderer: Arc::clone(&self.renderer),
            output_dir: Arc::new(self.output_dir.clone()),
            keep_running: Arc::clone(&self.keep_running),
        };
        let (work, filenames) = work_set(plan);

        *lock(&self.state) = RunState::Running;
        self.observer.progress(0);
        self.observer.log(&match mode {
            RunMode::Direct => format!(
                "rendering {} cards with {workers} workers",
                self.total_cards
            ),
            RunMode::Imposition => format!(
                "rendering {} cards onto {units} sheets with {workers} workers",
                self.total_cards
            ),
        });

        let chunks = pool.dispatch(&work, &shared, &tx);
        drop(tx);

        let ctx = Aggregator {
            rx,
            pool,
            live: chunks.len(),
            mode,
            workers,
            total_cards: self.total_cards,
            filenames,
            output_dir: self.output_dir.clone(),
            print_after: self.imposition.print_after_generation,
            observer: Arc::clone(&self.observer),
            state: Arc::clone(&self.state),
            cards_done: Arc::clone(&self.cards_done),
        };

        let handle = std::thread::Builder::new()
            .name("cardpress-aggregator".to_string())
            .spawn(move || ctx.run())
            .inspect_err(|_| {
                self.keep_running.store(false, Ordering::Release);
                *lock(&self.state) = RunState::Stopped;
            })?;
        self.aggregator = Some(handle);
        Ok(())
    }

    fn prepare(&mut self) -> CardResult<(RunPlan, WorkerPool)> {
        let rows = self
            .rows
            .take()
            .ok_or_else(|| CardError::planning("rows were already consumed"))?;

        self.renderer.prepare()?;
        let plan = plan_with_spec(rows, &self.pattern, &self.imposition, &self.opts.sheet)?;

        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            CardError::planning(format!(
                "create output dir '{}': {e}",
                self.output_dir.display()
            ))
        })?;

        let workers = match plan.mode() {
            RunMode::Direct => {
                let n = direct_worker_count(available_cores(), plan.work_units());
                self.opts.max_workers.map_or(n, |max| n.min(max.max(1)))
            }
            RunMode::Imposition => {
                imposition_worker_count(
                    available_cores(),
                    self.opts.imposition_max_workers,
                    plan.work_units(),
                )
            }
        };
        Ok((plan, WorkerPool::new(workers)?))
    }

    /// Ask workers to stop after their current unit and wait for all of them.
    ///
    /// On a run that already ended this returns its summary; before `start()` it is an error
    /// and leaves the manager startable.
    pub fn stop(&mut self) -> CardResult<RunSummary> {
        let state = self.state();
        if state == RunState::Running {
            self.keep_running.store(false, Ordering::Release);
        } else if !state.is_terminal() {
            return Err(CardError::validation(format!(
                "no run to stop (state {state:?})"
            )));
        }
        self.wait()
    }

    /// Block until every worker exited and the run reached a terminal state.
    pub fn wait(&mut self) -> CardResult<RunSummary> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        let handle = self.aggregator.take().ok_or_else(|| {
            CardError::validation(format!("no run in progress (state {:?})", self.state()))
        })?;
        let summary = handle
            .join()
            .map_err(|_| CardError::Other(anyhow::anyhow!("aggregator thread panicked")))?;
        self.summary = Some(summary.clone());
        Ok(summary)
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        if let Some(handle) = self.aggregator.take() {
            self.keep_running.store(false, Ordering::Release);
            let _ = handle.join();
        }
    }
}

fn work_set(plan: RunPlan) -> (WorkSet, Vec<String>) {
    match plan {
        RunPlan::Direct { jobs } => {
            let names = jobs.iter().map(|j| j.output_filename.clone()).collect();
            (WorkSet::Direct(jobs.into()), names)
        }
        RunPlan::Imposition { layout, pages } => {
            let names = pages.iter().map(|p| p.output_filename.clone()).collect();
            (
                WorkSet::Pages {
                    pages: pages.into(),
                    layout,
                },
                names,
            )
        }
    }
}

/// Single consumer of worker events. Owns the pool so its threads outlive every chunk.
struct Aggregator {
    rx: mpsc::Receiver<WorkerEvent>,
    pool: WorkerPool,
    live: usize,
    mode: RunMode,
    workers: usize,
    total_cards: usize,
    filenames: Vec<String>,
    output_dir: PathBuf,
    print_after: bool,
    observer: Arc<dyn RenderObserver>,
    state: Arc<Mutex<RunState>>,
    cards_done: Arc<AtomicUsize>,
}

impl Aggregator {
    fn run(mut self) -> RunSummary {
        let mut done = 0usize;
        let mut last_percent = 0u8;
        let mut written = Vec::<usize>::new();
        let mut errors = Vec::<String>::new();
        let mut cancelled = false;

        while self.live > 0 {
            let Ok(event) = self.rx.recv() else {
                tracing::warn!(live = self.live, "worker channel closed early");
                break;
            };
            match event {
                WorkerEvent::UnitDone {
                    worker,
                    unit,
                    cards,
                    filename,
                } => {
                    done += cards;
                    self.cards_done.store(done, Ordering::Release);
                    written.push(unit);
                    tracing::debug!(worker, unit, cards, file = %filename, "unit done");
                    self.observer.log(&match self.mode {
                        RunMode::Direct => {
                            format!("[{done}/{}] wrote {filename}", self.total_cards)
                        }
                        RunMode::Imposition => format!("sheet {filename} done ({cards} cards)"),
                    });

                    let percent = running_percent(done, self.total_cards);
                    if percent > last_percent {
                        last_percent = percent;
                        self.observer.progress(percent);
                    }
                }
                WorkerEvent::Failed {
                    worker,
                    chunk,
                    filename,
                    message,
                    fatal,
                } => {
                    let msg = if fatal {
                        format!(
                            "worker {worker} (units {}..{}) stopped at {filename}: {message}",
                            chunk.start, chunk.end
                        )
                    } else {
                        format!(
                            "worker {worker} (units {}..{}) lost {filename}: {message}",
                            chunk.start, chunk.end
                        )
                    };
                    tracing::warn!(worker, file = %filename, fatal, "{message}");
                    self.observer.error(&msg);
                    errors.push(msg);
                }
                WorkerEvent::Log { message, .. } => self.observer.log(&message),
                WorkerEvent::Exited {
                    worker,
                    completed,
                    reason,
                } => {
                    self.live -= 1;
                    tracing::debug!(worker, completed, ?reason, live = self.live, "worker exited");
                    if reason == ExitReason::Cancelled {
                        cancelled = true;
                        tracing::info!(worker, completed, "worker cancelled");
                    }
                }
            }
        }

        // Workers own their pages; there is no shared sheet buffer left to flush here.
        drop(self.pool);

        // A stop that lands after every unit ran still counts as a finished run.
        let state = if cancelled {
            RunState::Stopped
        } else {
            RunState::Finished
        };
        *lock(&self.state) = state;

        written.sort_unstable();
        let files: Vec<PathBuf> = written
            .into_iter()
            .filter_map(|unit| self.filenames.get(unit))
            .map(|name| self.output_dir.join(name))
            .collect();

        let print_queue = if self.print_after && !files.is_empty() {
            let unit = match self.mode {
                RunMode::Direct => "cards",
                RunMode::Imposition => "pages",
            };
            self.observer.log(&format!(
                "sending {} {unit} to the print queue",
                files.len()
            ));
            Some(files.clone())
        } else {
            None
        };

        if last_percent < 100 {
            self.observer.progress(100);
        }
        match state {
            RunState::Stopped => self.observer.log("run cancelled"),
            _ => self.observer.log(&format!(
                "run finished: {done}/{} cards, {} errors",
                self.total_cards,
                errors.len()
            )),
        }
        tracing::info!(?state, done, total = self.total_cards, errors = errors.len(), "run ended");
        self.observer.finished();

        RunSummary {
            state,
            mode: self.mode,
            workers: self.workers,
            total_cards: self.total_cards,
            cards_done: done,
            files,
            errors,
            print_queue,
        }
    }
}

/// Floor percentage, held below 100 until the run is over.
fn running_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = done.saturating_mul(100) / total;
    pct.min(99) as u8
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
#[path = "../../tests/unit/session/manager.rs"]
mod tests;
