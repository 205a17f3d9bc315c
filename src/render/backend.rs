use std::path::Path;

use image::{ImageFormat, RgbaImage};

use crate::foundation::core::Row;
use crate::foundation::error::CardResult;

/// A rendered card or sheet: straight-alpha RGBA8.
pub type CardImage = RgbaImage;

/// Turns one data row into pixels.
///
/// Implementations are called concurrently from several worker threads, one row per call.
/// Calls must not depend on each other; any interior state must be synchronized by the
/// implementation.
pub trait Renderer: Send + Sync {
    /// Check external collaborators (template, fonts, assets) before the run starts.
    ///
    /// Failures here are reported as planning errors and no worker is spawned.
    fn prepare(&self) -> CardResult<()> {
        Ok(())
    }

    /// Render `row` into memory. Required for imposition mode.
    fn render_to_image(&self, row: &Row) -> CardResult<CardImage>;

    /// Render `row` straight to a PNG at `out_path`.
    fn render_row(&self, row: &Row, out_path: &Path) -> CardResult<()> {
        let image = self.render_to_image(row)?;
        write_png(&image, out_path)
    }
}

/// Encode `image` as PNG at `path`.
pub fn write_png(image: &CardImage, path: &Path) -> CardResult<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
