use std::collections::BTreeMap;
use std::fmt;

/// Print resolution used for every mm -> px conversion.
pub const DPI: u32 = 300;

const MM_PER_INCH: f64 = 25.4;

/// Convert millimetres to whole pixels at `dpi`, truncating toward zero.
///
/// Negative and non-finite inputs map to `0`.
pub fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    let px = (mm * f64::from(dpi)) / MM_PER_INCH;
    if !px.is_finite() || px <= 0.0 {
        return 0;
    }
    px.floor() as u32
}

/// Physical orientation of a sheet.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Short edge horizontal.
    #[default]
    Portrait,
    /// Long edge horizontal.
    Landscape,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portrait => f.write_str("portrait"),
            Self::Landscape => f.write_str("landscape"),
        }
    }
}

/// One input unit: the same columns as plain text and as formatted text.
///
/// `plain` feeds output filenames, `rich` feeds the renderer. Both maps always share a key
/// set; a rich value that is absent or empty falls back to the plain value.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Row {
    plain: BTreeMap<String, String>,
    rich: BTreeMap<String, String>,
}

impl Row {
    /// Build a row from parallel plain/rich maps, restoring the shared-key invariant.
    pub fn new(plain: BTreeMap<String, String>, rich: BTreeMap<String, String>) -> Self {
        let mut plain = plain;
        let mut rich = rich;
        for key in rich.keys() {
            plain.entry(key.clone()).or_default();
        }
        for (key, value) in &plain {
            let slot = rich.entry(key.clone()).or_default();
            if slot.is_empty() {
                slot.clone_from(value);
            }
        }
        Self { plain, rich }
    }

    /// Row with no formatting: rich mirrors plain.
    pub fn from_plain(plain: BTreeMap<String, String>) -> Self {
        Self::new(plain, BTreeMap::new())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_plain(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn plain(&self) -> &BTreeMap<String, String> {
        &self.plain
    }

    pub fn rich(&self) -> &BTreeMap<String, String> {
        &self.rich
    }

    /// Plain value for `column`, also accepting a table column literally named `{column}`.
    pub fn plain_value(&self, column: &str) -> Option<&str> {
        lookup(&self.plain, column)
    }

    /// Rich value for `column`, with the same `{column}` fallback as [`Row::plain_value`].
    pub fn rich_value(&self, column: &str) -> Option<&str> {
        lookup(&self.rich, column)
    }
}

fn lookup<'a>(map: &'a BTreeMap<String, String>, column: &str) -> Option<&'a str> {
    if let Some(v) = map.get(column) {
        return Some(v.as_str());
    }
    map.get(&format!("{{{column}}}")).map(String::as_str)
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
