//! Running a plan: worker pool, event aggregation and the run lifecycle.

pub mod events;
pub mod manager;
pub mod pool;
