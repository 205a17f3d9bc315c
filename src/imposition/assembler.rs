use image::{Rgba, RgbaImage, imageops};

use crate::foundation::error::{CardError, CardResult};
use crate::imposition::layout::{SheetLayout, SheetSpec};

/// Thickness of a crop mark stroke, in pixels.
pub const MARK_STROKE_PX: u32 = 2;

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Composites rendered cards onto one sheet with crop marks.
///
/// Each worker owns its own assembler; the layout inside is immutable.
#[derive(Clone, Debug)]
pub struct SheetAssembler {
    layout: SheetLayout,
    filter: imageops::FilterType,
}

impl SheetAssembler {
    /// Assembler for `target_w_mm` x `target_h_mm` cards on A4.
    pub fn new(target_w_mm: f64, target_h_mm: f64) -> CardResult<Self> {
        Self::with_spec(target_w_mm, target_h_mm, &SheetSpec::A4)
    }

    pub fn with_spec(target_w_mm: f64, target_h_mm: f64, spec: &SheetSpec) -> CardResult<Self> {
        Ok(Self::from_layout(SheetLayout::compute(
            target_w_mm,
            target_h_mm,
            spec,
        )?))
    }

    pub fn from_layout(layout: SheetLayout) -> Self {
        Self {
            layout,
            filter: imageops::FilterType::Triangle,
        }
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity as usize
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    /// Place `cards` row-major on a white sheet and draw crop marks around the block.
    ///
    /// Cards are stretched to the exact cell size. Passing more than [`Self::capacity`]
    /// cards is rejected; passing none yields a blank sheet.
    pub fn assemble(&self, cards: &[RgbaImage]) -> CardResult<RgbaImage> {
        let l = &self.layout;
        if cards.len() > self.capacity() {
            return Err(CardError::assembly(format!(
                "{} cards do not fit a sheet of capacity {}",
                cards.len(),
                l.capacity
            )));
        }

        let mut sheet = RgbaImage::from_pixel(l.sheet_w_px, l.sheet_h_px, PAPER);
        if cards.is_empty() {
            return Ok(sheet);
        }

        for (idx, card) in cards.iter().enumerate() {
            let Some((x, y)) = l.cell_origin(idx as u32) else {
                break;
            };
            if card.dimensions() == (l.card_w_px, l.card_h_px) {
                imageops::overlay(&mut sheet, card, i64::from(x), i64::from(y));
            } else {
                let scaled = imageops::resize(card, l.card_w_px, l.card_h_px, self.filter);
                imageops::overlay(&mut sheet, &scaled, i64::from(x), i64::from(y));
            }
        }

        self.draw_crop_marks(&mut sheet);
        Ok(sheet)
    }

    /// One mark above and below every vertical cut line, one left and right of every
    /// horizontal cut line. Marks start `mark_gap_px` outside the block.
    fn draw_crop_marks(&self, sheet: &mut RgbaImage) {
        let l = &self.layout;
        let (x0, y0, x1, y1) = l.grid_bounds();
        let gap = l.mark_gap_px;
        let len = l.mark_len_px;
        let half = MARK_STROKE_PX / 2;

        for c in 0..=l.cols {
            let x = x0 + c * l.card_w_px;
            let sx = x.saturating_sub(half);
            let top = y0.saturating_sub(gap + len)..y0.saturating_sub(gap);
            let bottom = y1 + gap..y1 + gap + len;
            fill_rect(sheet, sx..sx + MARK_STROKE_PX, top);
            fill_rect(sheet, sx..sx + MARK_STROKE_PX, bottom);
        }

        for r in 0..=l.rows {
            let y = y0 + r * l.card_h_px;
            let sy = y.saturating_sub(half);
            let left = x0.saturating_sub(gap + len)..x0.saturating_sub(gap);
            let right = x1 + gap..x1 + gap + len;
            fill_rect(sheet, left, sy..sy + MARK_STROKE_PX);
            fill_rect(sheet, right, sy..sy + MARK_STROKE_PX);
        }
    }
}

fn fill_rect(img: &mut RgbaImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) {
    let (w, h) = img.dimensions();
    for y in ys.start..ys.end.min(h) {
        for x in xs.start..xs.end.min(w) {
            img.put_pixel(x, y, INK);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/imposition/assembler.rs"]
mod tests;
