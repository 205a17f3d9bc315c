use crate::foundation::core::{DPI, Orientation, mm_to_px};
use crate::foundation::error::{CardError, CardResult};

/// Physical sheet plus the print constants that shape the usable area.
///
/// Dimensions are given short edge first; orientation is decided per run by
/// [`SheetLayout::compute`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SheetSpec {
    pub short_mm: f64,
    pub long_mm: f64,
    /// Border the printer cannot reach.
    pub printer_margin_mm: f64,
    /// Distance between the card block and the start of a crop mark.
    pub mark_gap_mm: f64,
    pub mark_len_mm: f64,
    pub dpi: u32,
}

impl SheetSpec {
    pub const A4: Self = Self {
        short_mm: 210.0,
        long_mm: 297.0,
        printer_margin_mm: 4.0,
        mark_gap_mm: 2.0,
        mark_len_mm: 3.0,
        dpi: DPI,
    };

    /// Space kept free on each edge: printer margin + mark gap + mark length.
    pub fn edge_reserve_mm(&self) -> f64 {
        self.printer_margin_mm + self.mark_gap_mm + self.mark_len_mm
    }

    pub fn validate(&self) -> CardResult<()> {
        let dims = [
            ("short_mm", self.short_mm),
            ("long_mm", self.long_mm),
            ("printer_margin_mm", self.printer_margin_mm),
            ("mark_gap_mm", self.mark_gap_mm),
            ("mark_len_mm", self.mark_len_mm),
        ];
        for (name, v) in dims {
            if !v.is_finite() || v < 0.0 {
                return Err(CardError::validation(format!(
                    "sheet {name} must be finite and >= 0, got {v}"
                )));
            }
        }
        if self.short_mm <= 0.0 || self.long_mm < self.short_mm {
            return Err(CardError::validation(
                "sheet dimensions must satisfy 0 < short_mm <= long_mm",
            ));
        }
        if self.dpi == 0 {
            return Err(CardError::validation("sheet dpi must be > 0"));
        }
        Ok(())
    }
}

impl Default for SheetSpec {
    fn default() -> Self {
        Self::A4
    }
}

/// Grid that one orientation can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridFit {
    pub orientation: Orientation,
    pub cols: u32,
    pub rows: u32,
    pub capacity: u32,
}

/// Fully resolved placement of cards on a sheet, in pixels.
///
/// Computed once per run and shared read-only by every worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SheetLayout {
    pub orientation: Orientation,
    pub sheet_w_px: u32,
    pub sheet_h_px: u32,
    pub card_w_px: u32,
    pub card_h_px: u32,
    pub cols: u32,
    pub rows: u32,
    pub capacity: u32,
    pub margin_left: u32,
    pub margin_top: u32,
    pub mark_gap_px: u32,
    pub mark_len_px: u32,
}

impl SheetLayout {
    /// Pick the orientation holding the most `target_w_mm` x `target_h_mm` cards.
    ///
    /// Portrait is evaluated first and wins ties. The grid is centered on the full sheet,
    /// not on the usable area.
    pub fn compute(target_w_mm: f64, target_h_mm: f64, spec: &SheetSpec) -> CardResult<Self> {
        spec.validate()?;
        validate_target(target_w_mm, target_h_mm)?;

        let card_w_px = mm_to_px(target_w_mm, spec.dpi);
        let card_h_px = mm_to_px(target_h_mm, spec.dpi);
        if card_w_px == 0 || card_h_px == 0 {
            return Err(CardError::layout(format!(
                "card {target_w_mm}x{target_h_mm} mm is smaller than one pixel at {} dpi",
                spec.dpi
            )));
        }

        let short_px = mm_to_px(spec.short_mm, spec.dpi);
        let long_px = mm_to_px(spec.long_mm, spec.dpi);

        let [first, second] = Self::candidates(card_w_px, card_h_px, spec);
        let best = if second.capacity > first.capacity {
            second
        } else {
            first
        };

        let (sheet_w_px, sheet_h_px) = match best.orientation {
            Orientation::Portrait => (short_px, long_px),
            Orientation::Landscape => (long_px, short_px),
        };

        let grid_w = best.cols * card_w_px;
        let grid_h = best.rows * card_h_px;

        let layout = Self {
            orientation: best.orientation,
            sheet_w_px,
            sheet_h_px,
            card_w_px,
            card_h_px,
            cols: best.cols,
            rows: best.rows,
            capacity: best.capacity,
            margin_left: sheet_w_px.saturating_sub(grid_w) / 2,
            margin_top: sheet_h_px.saturating_sub(grid_h) / 2,
            mark_gap_px: mm_to_px(spec.mark_gap_mm, spec.dpi),
            mark_len_px: mm_to_px(spec.mark_len_mm, spec.dpi),
        };

        tracing::debug!(
            orientation = %layout.orientation,
            cols = layout.cols,
            rows = layout.rows,
            capacity = layout.capacity,
            "sheet layout resolved"
        );

        Ok(layout)
    }

    /// Both orientations in evaluation order: portrait, then landscape.
    pub fn candidates(card_w_px: u32, card_h_px: u32, spec: &SheetSpec) -> [GridFit; 2] {
        let short_px = mm_to_px(spec.short_mm, spec.dpi);
        let long_px = mm_to_px(spec.long_mm, spec.dpi);
        let reserve_px = mm_to_px(spec.edge_reserve_mm() * 2.0, spec.dpi);

        let usable_short = short_px.saturating_sub(reserve_px);
        let usable_long = long_px.saturating_sub(reserve_px);

        let fit = |orientation, usable_w: u32, usable_h: u32| {
            let cols = usable_w.checked_div(card_w_px).unwrap_or(0);
            let rows = usable_h.checked_div(card_h_px).unwrap_or(0);
            GridFit {
                orientation,
                cols,
                rows,
                capacity: cols * rows,
            }
        };

        [
            fit(Orientation::Portrait, usable_short, usable_long),
            fit(Orientation::Landscape, usable_long, usable_short),
        ]
    }

    /// Top-left pixel of grid cell `index` (row-major).
    pub fn cell_origin(&self, index: u32) -> Option<(u32, u32)> {
        if index >= self.capacity {
            return None;
        }
        let col = index % self.cols;
        let row = index / self.cols;
        Some((
            self.margin_left + col * self.card_w_px,
            self.margin_top + row * self.card_h_px,
        ))
    }

    /// Pixel bounds of the whole card block: `(x0, y0, x1, y1)`, end-exclusive.
    pub fn grid_bounds(&self) -> (u32, u32, u32, u32) {
        (
            self.margin_left,
            self.margin_top,
            self.margin_left + self.cols * self.card_w_px,
            self.margin_top + self.rows * self.card_h_px,
        )
    }
}

fn validate_target(w: f64, h: f64) -> CardResult<()> {
    if !(w.is_finite() && w > 0.0 && h.is_finite() && h > 0.0) {
        return Err(CardError::validation(format!(
            "card size must be finite and > 0 mm, got {w}x{h}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/imposition/layout.rs"]
mod tests;
