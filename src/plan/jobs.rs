use std::ops::Range;

use crate::config::ImpositionSettings;
use crate::foundation::core::Row;
use crate::foundation::error::{CardError, CardResult};
use crate::imposition::assembler::SheetAssembler;
use crate::imposition::layout::{SheetLayout, SheetSpec};
use crate::naming::{NameAllocator, sheet_filename};

/// Extension of every file the core writes.
pub const OUTPUT_EXTENSION: &str = "png";

/// One row to render, with its final output name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderJob {
    /// Position of the row in the caller's input.
    pub index: usize,
    pub row: Row,
    /// File name including extension, unique within the run.
    pub output_filename: String,
}

/// Consecutive jobs destined for one assembled sheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageJob {
    /// 1-based.
    pub page_number: usize,
    pub cards: Vec<RenderJob>,
    pub output_filename: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// One file per row.
    Direct,
    /// Rows packed onto sheets.
    Imposition,
}

/// Everything a run will do, fixed before any worker starts.
#[derive(Clone, Debug)]
pub enum RunPlan {
    Direct {
        jobs: Vec<RenderJob>,
    },
    Imposition {
        layout: SheetLayout,
        pages: Vec<PageJob>,
    },
}

impl RunPlan {
    pub fn mode(&self) -> RunMode {
        match self {
            Self::Direct { .. } => RunMode::Direct,
            Self::Imposition { .. } => RunMode::Imposition,
        }
    }

    /// Rows covered by the plan; progress is measured against this.
    pub fn total_cards(&self) -> usize {
        match self {
            Self::Direct { jobs } => jobs.len(),
            Self::Imposition { pages, .. } => pages.iter().map(|p| p.cards.len()).sum(),
        }
    }

    /// Units handed to workers: rows in direct mode, pages in imposition mode.
    pub fn work_units(&self) -> usize {
        match self {
            Self::Direct { jobs } => jobs.len(),
            Self::Imposition { pages, .. } => pages.len(),
        }
    }

    /// Output file names in plan order.
    pub fn output_filenames(&self) -> Vec<&str> {
        match self {
            Self::Direct { jobs } => jobs.iter().map(|j| j.output_filename.as_str()).collect(),
            Self::Imposition { pages, .. } => {
                pages.iter().map(|p| p.output_filename.as_str()).collect()
            }
        }
    }
}

/// Plan a run on A4 sheets.
pub fn plan(rows: Vec<Row>, pattern: &str, imposition: &ImpositionSettings) -> CardResult<RunPlan> {
    plan_with_spec(rows, pattern, imposition, &SheetSpec::A4)
}

/// Allocate every output name, then batch into pages when imposition is on.
///
/// Names are assigned sequentially over the whole row set regardless of mode, so two jobs
/// never share a name no matter how the work is later split.
#[tracing::instrument(skip(rows, imposition, spec), fields(rows = rows.len()))]
pub fn plan_with_spec(
    rows: Vec<Row>,
    pattern: &str,
    imposition: &ImpositionSettings,
    spec: &SheetSpec,
) -> CardResult<RunPlan> {
    if rows.is_empty() {
        return Err(CardError::planning("no rows to render"));
    }
    if pattern.trim().is_empty() {
        return Err(CardError::planning("naming pattern is empty"));
    }
    imposition.validate()?;

    let jobs = allocate_jobs(rows, pattern);

    if !imposition.enabled {
        tracing::info!(jobs = jobs.len(), "planned direct run");
        return Ok(RunPlan::Direct { jobs });
    }

    let assembler =
        SheetAssembler::with_spec(imposition.target_w_mm, imposition.target_h_mm, spec)?;
    let capacity = assembler.capacity();
    if capacity == 0 {
        return Err(CardError::layout(format!(
            "a {}x{} mm card does not fit on a {}x{} mm sheet",
            imposition.target_w_mm, imposition.target_h_mm, spec.short_mm, spec.long_mm
        )));
    }

    let pages = paginate(jobs, capacity, pattern);
    let layout = *assembler.layout();
    tracing::info!(
        pages = pages.len(),
        capacity,
        orientation = %layout.orientation,
        "planned imposition run"
    );
    Ok(RunPlan::Imposition { layout, pages })
}

fn allocate_jobs(rows: Vec<Row>, pattern: &str) -> Vec<RenderJob> {
    let mut names = NameAllocator::new();
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let stem = names.allocate(pattern, &row);
            RenderJob {
                index,
                row,
                output_filename: format!("{stem}.{OUTPUT_EXTENSION}"),
            }
        })
        .collect()
}

/// Split `jobs` into consecutive pages of `capacity` cards; the last page may be short.
pub fn paginate(jobs: Vec<RenderJob>, capacity: usize, pattern: &str) -> Vec<PageJob> {
    let capacity = capacity.max(1);
    let mut pages = Vec::with_capacity(jobs.len().div_ceil(capacity));
    let mut iter = jobs.into_iter().peekable();

    while iter.peek().is_some() {
        let page_number = pages.len() + 1;
        let cards: Vec<RenderJob> = iter.by_ref().take(capacity).collect();
        pages.push(PageJob {
            page_number,
            cards,
            output_filename: format!(
                "{}.{OUTPUT_EXTENSION}",
                sheet_filename(pattern, page_number)
            ),
        });
    }

    pages
}

/// Split `len` items into at most `parts` contiguous ranges whose sizes differ by at most
/// one. Earlier ranges take the remainder. No range is empty.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, len);
    let base = len / parts;
    let extra = len % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        out.push(start..start + size);
        start += size;
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/plan/jobs.rs"]
mod tests;
