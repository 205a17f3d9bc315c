use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::foundation::core::Row;
use crate::foundation::error::{CardError, CardResult};
use crate::render::backend::{CardImage, Renderer};

/// Column holding the card image path, relative to the renderer root.
pub const FILE_COLUMN: &str = "file";

/// Column holding the file stem, handy as a naming pattern token.
pub const STEM_COLUMN: &str = "nome";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Renderer over cards that were already rasterized elsewhere.
///
/// Each row names an image file; "rendering" decodes it. Used to impose an existing folder
/// of cards onto sheets.
#[derive(Clone, Debug)]
pub struct ImageFileRenderer {
    root: PathBuf,
    column: String,
}

impl ImageFileRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            column: FILE_COLUMN.to_string(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    fn source_path(&self, row: &Row) -> CardResult<PathBuf> {
        let rel = row
            .plain_value(&self.column)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CardError::render(format!("row has no '{}' column", self.column)))?;
        Ok(self.root.join(rel))
    }
}

impl Renderer for ImageFileRenderer {
    fn prepare(&self) -> CardResult<()> {
        if !self.root.is_dir() {
            return Err(CardError::planning(format!(
                "card directory '{}' not found",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn render_to_image(&self, row: &Row) -> CardResult<CardImage> {
        let path = self.source_path(row)?;
        let img = image::open(&path)
            .map_err(|e| CardError::render(format!("decode '{}': {e}", path.display())))?;
        Ok(img.to_rgba8())
    }
}

/// One row per image file in `dir`, sorted by file name.
///
/// Rows carry [`FILE_COLUMN`] (the file name) and [`STEM_COLUMN`] (the name without
/// extension).
pub fn rows_from_dir(dir: &Path) -> CardResult<Vec<Row>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_image {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();

    Ok(names
        .into_iter()
        .map(|name| {
            let stem = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let mut plain = BTreeMap::new();
            plain.insert(FILE_COLUMN.to_string(), name);
            plain.insert(STEM_COLUMN.to_string(), stem);
            Row::from_plain(plain)
        })
        .collect())
}

#[cfg(test)]
#[path = "../../tests/unit/render/image_dir.rs"]
mod tests;
