//! Scroll-and-dedupe enumeration of the virtualized measurement tree.
//!
//! Only rows inside the viewport exist as accessibility elements, so the tree
//! is walked by scrolling over it and collecting rows until nothing new shows
//! up.

use super::DriverContext;
use crate::element::{ControlRole, UIElement};
use crate::errors::AutomationError;
use crate::locale::{is_selection_worthy, normalize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Wheel ticks per scroll step; negative scrolls down.
pub const SCROLL_TICKS: i32 = -3;
const MAX_EMPTY_PASSES: u32 = 3;
const MAX_SCROLLS: u32 = 3;
/// Upward scroll issued first so the walk starts from the top of the tree.
const REWIND_TICKS: i32 = 10 * -SCROLL_TICKS;
/// Horizontal offset of a row's leading checkbox glyph.
const CHECKBOX_GLYPH_OFFSET: f64 = 15.0;
const MAX_TREE_DEPTH: usize = 16;

/// Identity of a rendered row: runtime id plus on-screen position.
type RowKey = (Vec<i32>, i64, i64);
/// A selected measurement: tree level plus normalized text. A parent and a
/// child sharing a label are distinct; the same row seen again is not.
type SelectionKey = (usize, String);

#[derive(Debug, Clone, Default)]
pub struct TreeScan {
    /// Normalized texts of the rows that were selected, in selection order.
    pub selected: Vec<String>,
    pub rows_seen: usize,
    pub scrolls: u32,
    pub used_fallback_anchor: bool,
}

enum ClickStrategy {
    Glyph,
    CheckBoxChild,
    Row,
}

pub(super) struct TreeSelector<'a> {
    ctx: DriverContext<'a>,
    window: &'a UIElement,
}

impl<'a> TreeSelector<'a> {
    pub(super) fn new(ctx: DriverContext<'a>, window: &'a UIElement) -> Self {
        Self { ctx, window }
    }

    fn visible_rows(&self) -> Result<Vec<UIElement>, AutomationError> {
        self.ctx
            .desktop
            .find_descendants(self.window, ControlRole::TreeItem)
    }

    /// Centroid of the rows currently rendered, if any.
    fn centroid(&self, rows: &[UIElement]) -> Option<(f64, f64)> {
        let centers: Vec<(f64, f64)> = rows
            .iter()
            .filter_map(|row| row.bounds().ok())
            .filter(|rect| !rect.is_empty())
            .map(|rect| rect.center())
            .collect();
        if centers.is_empty() {
            return None;
        }
        let n = centers.len() as f64;
        let (sx, sy) = centers
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        Some((sx / n, sy / n))
    }

    fn row_key(row: &UIElement) -> Option<RowKey> {
        let rect = row.bounds().ok()?;
        let runtime_id = row
            .runtime_id()
            .unwrap_or_else(|_| vec![row.object_id() as i32]);
        Some((runtime_id, rect.top.round() as i64, rect.left.round() as i64))
    }

    /// Number of tree item ancestors of `row`.
    fn row_level(row: &UIElement) -> usize {
        let mut level = 0;
        let mut current = row.parent().ok().flatten();
        while let Some(parent) = current {
            if parent.role() != ControlRole::TreeItem || level >= MAX_TREE_DEPTH {
                break;
            }
            level += 1;
            current = parent.parent().ok().flatten();
        }
        level
    }

    /// Current checked state of a row, read from its checkbox child when it
    /// has one.
    fn row_checked(&self, row: &UIElement) -> Option<bool> {
        let checkbox = row
            .descendants(Some(ControlRole::CheckBox))
            .ok()
            .and_then(|found| found.into_iter().next());
        match checkbox {
            Some(checkbox) => checkbox.toggle_state().ok().flatten(),
            None => row.toggle_state().ok().flatten(),
        }
    }

    fn try_strategy(&self, row: &UIElement, strategy: &ClickStrategy) -> Result<(), AutomationError> {
        let desktop = self.ctx.desktop;
        match strategy {
            ClickStrategy::Glyph => {
                let rect = desktop.rectangle(row)?;
                desktop.click_at(
                    rect.left + CHECKBOX_GLYPH_OFFSET,
                    rect.top + rect.height / 2.0,
                )
            }
            ClickStrategy::CheckBoxChild => {
                let checkbox = desktop
                    .find_descendants(row, ControlRole::CheckBox)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        AutomationError::ElementNotFound("row has no checkbox child".to_string())
                    })?;
                desktop.click(&checkbox)
            }
            ClickStrategy::Row => desktop.click(row),
        }
    }

    /// Select one row, trying each click strategy in turn. A strategy counts
    /// as successful when the click went through and the row does not report
    /// itself unchecked afterwards.
    fn select_row(&self, row: &UIElement, text: &str) -> bool {
        if self.row_checked(row) == Some(true) {
            debug!("{text:?} already checked");
            return true;
        }
        for strategy in [
            ClickStrategy::Glyph,
            ClickStrategy::CheckBoxChild,
            ClickStrategy::Row,
        ] {
            match self.try_strategy(row, &strategy) {
                Ok(()) if self.row_checked(row) != Some(false) => return true,
                Ok(()) => debug!("{text:?} still unchecked, trying next strategy"),
                Err(e) => debug!("{text:?}: click failed: {e}"),
            }
        }
        false
    }

    pub(super) fn run(&self) -> Result<TreeScan, AutomationError> {
        let desktop = self.ctx.desktop;
        let cancel = desktop.cancel_flag();
        let mut scan = TreeScan::default();

        let mut rows = self.visible_rows()?;
        let mut anchor = self.centroid(&rows);
        if let Some((x, y)) = anchor {
            desktop.scroll(x, y, REWIND_TICKS)?;
            cancel.sleep(self.ctx.config.delays.scroll_settle());
            rows = self.visible_rows()?;
            anchor = self.centroid(&rows).or(anchor);
        }
        let (anchor_x, anchor_y) = match anchor {
            Some(point) => point,
            None => {
                warn!("measurement tree shows no rows; scrolling at the fallback anchor");
                scan.used_fallback_anchor = true;
                self.ctx.config.scroll_anchor_fallback
            }
        };

        let mut seen: HashSet<RowKey> = HashSet::new();
        let mut selected: HashSet<SelectionKey> = HashSet::new();
        let mut empty_passes = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let mut new_rows = 0usize;
            for row in &rows {
                let Some(key) = Self::row_key(row) else {
                    continue;
                };
                if !seen.insert(key) {
                    continue;
                }
                new_rows += 1;

                let text = normalize(&desktop.text(row).unwrap_or_default());
                if !is_selection_worthy(&text) {
                    continue;
                }
                let selection = (Self::row_level(row), text);
                if selected.contains(&selection) {
                    continue;
                }
                let text = &selection.1;
                if self.select_row(row, text) {
                    debug!("selected {text:?} at level {}", selection.0);
                    scan.selected.push(text.clone());
                    selected.insert(selection);
                } else {
                    warn!("could not select {text:?}");
                }
            }
            scan.rows_seen += new_rows;

            if new_rows > 0 {
                empty_passes = 0;
            } else {
                empty_passes += 1;
                if empty_passes >= MAX_EMPTY_PASSES {
                    break;
                }
            }
            if scan.scrolls >= MAX_SCROLLS {
                break;
            }
            desktop.scroll(anchor_x, anchor_y, SCROLL_TICKS)?;
            scan.scrolls += 1;
            let settle = self
                .ctx
                .config
                .delays
                .scroll_settle()
                .mul_f64(1.0 + f64::from(empty_passes) / f64::from(MAX_EMPTY_PASSES));
            cancel.sleep(settle);
            rows = self.visible_rows()?;
        }

        info!(
            "tree walk: {} rows seen, {} selected after {} scrolls",
            scan.rows_seen,
            scan.selected.len(),
            scan.scrolls
        );
        Ok(scan)
    }
}
