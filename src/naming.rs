//! Output filename allocation.
//!
//! Names are built from a pattern such as `card_{nome}` and one row's plain values, then
//! sanitized for Windows/POSIX filesystems and made unique against every name handed out
//! earlier in the same run. Allocation is sequential by construction: one [`NameAllocator`]
//! owns the `used` set and is driven over the whole row set before any worker starts.

use std::collections::HashSet;

use crate::foundation::core::Row;

/// Name used when a pattern resolves to nothing printable.
pub const EMPTY_NAME_PLACEHOLDER: &str = "arquivo";

/// Label between the pattern and the page number in sheet filenames.
pub const SHEET_LABEL: &str = "Folha";

/// Slug used when a model name has no usable characters.
pub const DEFAULT_MODEL_SLUG: &str = "modelo";

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Allocates collision-free output names for one run.
#[derive(Debug, Default, Clone)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `pattern` against `row`, sanitize, and reserve a unique variant.
    pub fn allocate(&mut self, pattern: &str, row: &Row) -> String {
        let raw = apply_pattern(pattern, row);
        let base = sanitize_filename(&raw);
        unique_name(&base, &mut self.used)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

/// Replace every `{column}` token with the row's trimmed plain value.
///
/// Unknown columns resolve to the empty string. Braces that do not form a token (`{`, `{}`,
/// `{a{b}`) are kept literally.
pub fn apply_pattern(pattern: &str, row: &Row) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['{', '}']) {
            Some(end) if after[end..].starts_with('}') && end > 0 => {
                let key = after[..end].trim();
                out.push_str(row.plain_value(key).unwrap_or("").trim());
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Make `name` safe to use as a file stem.
///
/// Illegal characters become `_`, whitespace runs collapse to one space, trailing dots and
/// spaces are dropped. The result is never empty and sanitizing it again is a no-op.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || (c.is_control() && !c.is_whitespace()) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['.', ' ']).trim();

    if trimmed.is_empty() {
        EMPTY_NAME_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Return `base` if free, otherwise the first free `base_NN` (`_01`, `_02`, ...).
///
/// The returned name is inserted into `used`.
pub fn unique_name(base: &str, used: &mut HashSet<String>) -> String {
    if used.insert(base.to_string()) {
        return base.to_string();
    }

    let mut i = 1u32;
    loop {
        let candidate = format!("{base}_{i:02}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        i += 1;
    }
}

/// Filename stem for the 1-based `page_number`-th assembled sheet.
pub fn sheet_filename(pattern: &str, page_number: usize) -> String {
    let stripped: String = pattern.chars().filter(|c| !matches!(c, '{' | '}')).collect();
    let base = sanitize_filename(&stripped);
    format!("{base}_{SHEET_LABEL}_{page_number:02}")
}

/// `"Cartão Aniversário"` -> `"cartao_aniversario"`.
pub fn slugify_model_name(name: &str) -> String {
    let slug = slug::slugify(name.trim()).replace('-', "_");
    let slug: String = slug
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    if slug.is_empty() {
        DEFAULT_MODEL_SLUG.to_string()
    } else {
        slug
    }
}

/// Effective naming pattern for a model: `<slug>_<suffix>`, or just the slug.
pub fn output_pattern(model_slug: &str, output_suffix: Option<&str>) -> String {
    match output_suffix.map(str::trim) {
        Some(suffix) if !suffix.is_empty() => format!("{model_slug}_{suffix}"),
        _ => model_slug.to_string(),
    }
}

/// Per-run output folder name, e.g. `Lote_26.10.19_14.05.09`.
pub fn batch_dir_name(started_at: chrono::NaiveDateTime) -> String {
    format!("Lote_{}", started_at.format("%y.%m.%d_%H.%M.%S"))
}

#[cfg(test)]
#[path = "../tests/unit/naming.rs"]
mod tests;
