//! Cardpress renders one card per data row and optionally packs the cards onto print-ready
//! sheets with crop marks.
//!
//! A run goes through three stages:
//!
//! - [`plan()`] allocates every output name up front and, for imposition, groups rows into pages
//!   sized by the [`SheetAssembler`] capacity.
//! - A [`RenderManager`] splits the plan into contiguous chunks, one per worker, and runs them
//!   on a fixed pool.
//! - Worker events are folded by a single aggregator into progress, log and error
//!   notifications for a [`RenderObserver`].
//!
//! Pixels come from a caller-supplied [`Renderer`].
#![forbid(unsafe_code)]

pub mod config;
pub mod foundation;
pub mod imposition;
pub mod naming;
pub mod plan;
pub mod render;
pub mod session;

pub use crate::config::{ImpositionSettings, ModelConfig};
pub use crate::foundation::core::{DPI, Orientation, Row, mm_to_px};
pub use crate::foundation::error::{CardError, CardResult};
pub use crate::imposition::assembler::SheetAssembler;
pub use crate::imposition::layout::{GridFit, SheetLayout, SheetSpec};
pub use crate::naming::{
    NameAllocator, batch_dir_name, output_pattern, sanitize_filename, sheet_filename,
    slugify_model_name,
};
pub use crate::plan::jobs::{PageJob, RenderJob, RunMode, RunPlan, partition, plan, plan_with_spec};
pub use crate::render::backend::{CardImage, Renderer, write_png};
pub use crate::render::image_dir::{ImageFileRenderer, rows_from_dir};
pub use crate::session::events::{
    CollectingObserver, ExitReason, RenderObserver, TracingObserver, WorkerEvent,
};
pub use crate::session::manager::{RenderManager, RenderManagerOpts, RunState, RunSummary};
