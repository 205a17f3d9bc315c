//! Up-front job planning: names, pages and worker chunks.

pub mod jobs;
