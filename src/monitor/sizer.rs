//! Column sizing derived from the data a view currently holds.

use unicode_width::UnicodeWidthStr;

use crate::db::TabularResult;

/// Extra cells added to the widest entry of a column.
pub const COLUMN_PADDING: u16 = 2;
/// No column is ever narrower than this.
pub const MINIMUM_COLUMN_WIDTH: u16 = 8;

/// Measures rendered text. Headers are measured bold, content regular.
pub trait TextMeasure {
    fn measure(&self, text: &str, bold: bool) -> u16;
}

impl<F> TextMeasure for F
where
    F: Fn(&str, bool) -> u16,
{
    fn measure(&self, text: &str, bold: bool) -> u16 {
        self(text, bold)
    }
}

/// Display width in terminal cells. Bold text occupies the same cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalMeasure;

impl TextMeasure for TerminalMeasure {
    fn measure(&self, text: &str, _bold: bool) -> u16 {
        u16::try_from(text.width()).unwrap_or(u16::MAX)
    }
}

/// Width of every column in `result`.
///
/// Each width is `max(header, widest cell) + COLUMN_PADDING`, floored at
/// `MINIMUM_COLUMN_WIDTH`. Widths are always computed from scratch, so the
/// output length is the result's column count and nothing from a previous
/// schema survives.
pub fn compute_widths<M>(result: &TabularResult, measure: &M) -> Vec<u16>
where
    M: TextMeasure + ?Sized,
{
    let Some(header) = result.header() else {
        return Vec::new();
    };

    header
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let header_width = measure.measure(name, true);
            let content_width = result.rows()[1..]
                .iter()
                .filter_map(|row| row.get(col))
                .map(|cell| measure.measure(cell, false))
                .max()
                .unwrap_or(0);

            header_width
                .max(content_width)
                .saturating_add(COLUMN_PADDING)
                .max(MINIMUM_COLUMN_WIDTH)
        })
        .collect()
}
