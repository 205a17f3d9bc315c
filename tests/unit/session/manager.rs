use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};

use super::*;
use crate::render::backend::CardImage;
use crate::session::events::CollectingObserver;

#[derive(Default)]
struct FakeRenderer {
    fail: Option<String>,
    missing_template: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Renderer for FakeRenderer {
    fn prepare(&self) -> CardResult<()> {
        if self.missing_template {
            return Err(CardError::planning("template not found"));
        }
        Ok(())
    }

    fn render_to_image(&self, row: &Row) -> CardResult<CardImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let name = row.plain_value("nome").unwrap_or_default();
        if self.fail.as_deref() == Some(name) {
            return Err(CardError::render(format!("bad row {name}")));
        }
        Ok(RgbaImage::from_pixel(6, 4, Rgba([1, 2, 3, 255])))
    }
}

fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| Row::from_pairs([("nome", format!("p{i}"))]))
        .collect()
}

fn small_sheet() -> SheetSpec {
    SheetSpec {
        short_mm: 60.0,
        long_mm: 80.0,
        printer_margin_mm: 1.0,
        mark_gap_mm: 1.0,
        mark_len_mm: 1.0,
        dpi: 254,
    }
}

fn assert_monotonic_to_100(progress: &[u8]) {
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(progress.iter().filter(|p| **p == 100).count(), 1);
}

#[test]
fn running_percent_floors_and_caps() {
    assert_eq!(running_percent(0, 10), 0);
    assert_eq!(running_percent(1, 3), 33);
    assert_eq!(running_percent(2, 3), 66);
    assert_eq!(running_percent(3, 3), 99);
    assert_eq!(running_percent(5, 0), 0);
}

#[test]
fn direct_run_writes_files_in_plan_order() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let mut rows = rows(7);
    rows.push(Row::from_pairs([("nome", "p0")]));

    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows,
        dir.path(),
        "card_{nome}",
        ImpositionSettings::disabled(),
    )
    .with_opts(RenderManagerOpts {
        max_workers: Some(3),
        ..RenderManagerOpts::default()
    })
    .with_observer(observer.clone());

    assert_eq!(manager.state(), RunState::Idle);
    manager.start().unwrap();
    let summary = manager.wait().unwrap();

    assert_eq!(summary.state, RunState::Finished);
    assert!(summary.is_complete());
    assert_eq!(summary.mode, RunMode::Direct);
    assert!(summary.workers >= 1 && summary.workers <= 3);
    assert_eq!((summary.cards_done, summary.total_cards), (8, 8));
    let names: Vec<_> = summary
        .files
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    let mut expected: Vec<String> = (0..7).map(|i| format!("card_p{i}.png")).collect();
    expected.push("card_p0_01.png".to_string());
    assert_eq!(names, expected);
    assert!(summary.files.iter().all(|p| p.is_file()));
    assert_eq!(summary.print_queue, None);

    let seen = observer.snapshot();
    assert_monotonic_to_100(&seen.progress);
    assert_eq!(seen.finished, 1);
    assert!(seen.errors.is_empty());
    assert_eq!(manager.state(), RunState::Finished);
    assert_eq!(manager.progress_counts(), (8, 8));
}

#[test]
fn one_bad_row_does_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let renderer = FakeRenderer {
        fail: Some("p1".into()),
        ..FakeRenderer::default()
    };
    let mut manager = RenderManager::new(
        Arc::new(renderer),
        rows(6),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled(),
    )
    .with_opts(RenderManagerOpts {
        max_workers: Some(1),
        ..RenderManagerOpts::default()
    })
    .with_observer(observer.clone());

    manager.start().unwrap();
    let summary = manager.wait().unwrap();

    // A single worker owns the whole chunk, so everything after p1 is abandoned.
    assert_eq!(summary.state, RunState::Finished);
    assert!(!summary.is_complete());
    assert_eq!(summary.cards_done, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("p1.png"), "{}", summary.errors[0]);

    let seen = observer.snapshot();
    assert_eq!(seen.errors, summary.errors);
    assert_monotonic_to_100(&seen.progress);
    assert_eq!(seen.finished, 1);
}

#[test]
fn imposition_run_queues_sheets_for_printing() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows(9),
        dir.path(),
        "convite_{nome}",
        ImpositionSettings::sheets(20.0, 30.0).with_print_after_generation(true),
    )
    .with_opts(RenderManagerOpts {
        sheet: small_sheet(),
        ..RenderManagerOpts::default()
    })
    .with_observer(observer.clone());

    manager.start().unwrap();
    let summary = manager.wait().unwrap();

    assert_eq!(summary.mode, RunMode::Imposition);
    let expected_workers = imposition_worker_count(available_cores(), IMPOSITION_MAX_WORKERS, 3);
    assert_eq!(summary.workers, expected_workers);
    assert!(summary.workers <= 2);
    assert_eq!((summary.cards_done, summary.total_cards), (9, 9));
    let expected: Vec<PathBuf> = (1..=3)
        .map(|n| dir.path().join(format!("convite_nome_Folha_{n:02}.png")))
        .collect();
    assert_eq!(summary.files, expected);
    assert_eq!(summary.print_queue.as_ref(), Some(&expected));
    assert!(expected.iter().all(|p| p.is_file()));

    let seen = observer.snapshot();
    assert!(seen.logs.iter().any(|l| l.contains("print queue")));
    assert_monotonic_to_100(&seen.progress);
}

#[test]
fn planning_failures_leave_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("never");
    let observer = Arc::new(CollectingObserver::new());
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        vec![],
        &out,
        "{nome}",
        ImpositionSettings::disabled(),
    )
    .with_observer(observer.clone());

    let err = manager.start().unwrap_err();
    assert!(err.is_planning());
    assert_eq!(manager.state(), RunState::Failed);
    assert!(!out.exists());
    assert!(manager.wait().is_err());
    assert_eq!(observer.snapshot().errors.len(), 1);
    assert_eq!(observer.snapshot().finished, 0);
}

#[test]
fn missing_template_is_a_planning_error() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = Arc::new(FakeRenderer {
        missing_template: true,
        ..FakeRenderer::default()
    });
    let mut manager = RenderManager::new(
        renderer.clone(),
        rows(3),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled(),
    );
    assert!(manager.start().is_err());
    assert_eq!(manager.state(), RunState::Failed);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn a_run_cannot_be_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows(2),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled(),
    );
    manager.start().unwrap();
    assert!(manager.start().is_err());
    let first = manager.wait().unwrap();
    assert!(manager.start().is_err());
    assert_eq!(manager.wait().unwrap(), first);
}

#[test]
fn stop_waits_for_workers_and_keeps_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let renderer = Arc::new(FakeRenderer {
        delay: Some(Duration::from_millis(20)),
        ..FakeRenderer::default()
    });
    let mut manager = RenderManager::new(
        renderer.clone(),
        rows(60),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled(),
    )
    .with_opts(RenderManagerOpts {
        max_workers: Some(1),
        ..RenderManagerOpts::default()
    })
    .with_observer(observer.clone());

    manager.start().unwrap();
    assert!(manager.is_running());
    let deadline = Instant::now() + Duration::from_secs(10);
    while manager.progress_counts().0 == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }

    let summary = manager.stop().unwrap();
    assert_eq!(summary.state, RunState::Stopped);
    assert_eq!(manager.state(), RunState::Stopped);
    assert!(summary.cards_done >= 1 && summary.cards_done < 60);
    assert_eq!(summary.files.len(), summary.cards_done);
    // In-flight rows finish; nothing starts after the flag is seen.
    assert_eq!(renderer.calls.load(Ordering::SeqCst), summary.cards_done);

    let seen = observer.snapshot();
    assert_eq!(seen.finished, 1);
    assert_monotonic_to_100(&seen.progress);
    assert!(seen.logs.iter().any(|l| l.contains("cancelled")));
}

#[test]
fn a_lost_sheet_is_reported_and_the_run_still_finishes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("lote_Folha_02.png")).unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows(12),
        dir.path(),
        "lote",
        ImpositionSettings::sheets(20.0, 30.0),
    )
    .with_opts(RenderManagerOpts {
        imposition_max_workers: 1,
        sheet: small_sheet(),
        ..RenderManagerOpts::default()
    })
    .with_observer(observer.clone());

    manager.start().unwrap();
    let summary = manager.wait().unwrap();

    assert_eq!(summary.state, RunState::Finished);
    assert_eq!(summary.workers, 1);
    assert_eq!(summary.cards_done, 8);
    assert_eq!(
        summary.files,
        vec![
            dir.path().join("lote_Folha_01.png"),
            dir.path().join("lote_Folha_03.png"),
        ]
    );
    assert_eq!(summary.errors.len(), 1);
    assert!(
        summary.errors[0].contains("lost lote_Folha_02.png"),
        "{}",
        summary.errors[0]
    );
    assert_monotonic_to_100(&observer.snapshot().progress);
}

#[test]
fn direct_print_queue_counts_cards() {
    let dir = tempfile::tempdir().unwrap();
    let observer = Arc::new(CollectingObserver::new());
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows(3),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled().with_print_after_generation(true),
    )
    .with_observer(observer.clone());

    manager.start().unwrap();
    let summary = manager.wait().unwrap();

    assert_eq!(summary.print_queue.as_ref().map(Vec::len), Some(3));
    let logs = observer.snapshot().logs;
    assert!(
        logs.iter().any(|l| l == "sending 3 cards to the print queue"),
        "{logs:?}"
    );
}

#[test]
fn stop_before_start_is_rejected_and_leaves_the_run_startable() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows(4),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled(),
    );

    assert!(manager.stop().is_err());
    assert_eq!(manager.state(), RunState::Idle);

    manager.start().unwrap();
    let summary = manager.wait().unwrap();
    assert_eq!(summary.state, RunState::Finished);
    assert_eq!(summary.cards_done, 4);
    assert!(summary.state.is_terminal());

    // Stopping an ended run hands back its summary.
    assert_eq!(manager.stop().unwrap(), summary);
}

#[test]
fn stop_after_every_unit_ran_still_reports_finished() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = RenderManager::new(
        Arc::new(FakeRenderer::default()),
        rows(2),
        dir.path(),
        "{nome}",
        ImpositionSettings::disabled(),
    )
    .with_opts(RenderManagerOpts {
        max_workers: Some(1),
        ..RenderManagerOpts::default()
    });

    manager.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while manager.progress_counts().0 < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }

    let summary = manager.stop().unwrap();
    assert_eq!(summary.cards_done, 2);
    assert_eq!(summary.state, RunState::Finished);
    assert!(summary.is_complete());
}
