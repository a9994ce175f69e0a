//! Phase 2: the configuration window, up to and including the save dialog.
//!
//! Sub-phases 1 to 6 only prepare the export. The analyzer keeps the previous
//! configuration between sessions, so a failure there is recorded as a warning
//! and the export is attempted anyway. Triggering the export and the save
//! dialog are fatal for the capture.

use super::save_dialog::SaveDialog;
use super::tree::{TreeScan, TreeSelector};
use super::{DriverContext, HandOff};
use crate::element::{ControlRole, UIElement};
use crate::errors::{AutomationError, ExtractError};
use crate::locale::UiToken;
use crate::retry::Backoff;
use crate::supervisor::AppHandle;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

const PHASE: &str = "configuration window";
const CONNECT_ATTEMPTS: u32 = 5;
/// Offset into the data grid that lands inside its first cell.
const TABLE_FOCUS_INSET: f64 = 3.0;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    /// Non-fatal problems met while preparing the export.
    pub warnings: Vec<String>,
    /// Tree rows selected for export.
    pub selected: Vec<String>,
    /// Path typed into the save dialog.
    pub requested_path: PathBuf,
}

pub struct ConfigurationWindowDriver<'a> {
    ctx: DriverContext<'a>,
    warnings: Vec<String>,
}

impl<'a> ConfigurationWindowDriver<'a> {
    pub fn new(ctx: DriverContext<'a>) -> Self {
        Self {
            ctx,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, sub_phase: &str, message: impl std::fmt::Display) {
        warn!(sub_phase, "{message}");
        self.warnings.push(format!("{sub_phase}: {message}"));
    }

    #[instrument(skip_all, fields(phase = PHASE, capture = stem))]
    pub fn run(
        &mut self,
        app: &AppHandle,
        handoff: &HandOff,
        stem: &str,
    ) -> Result<ExportReport, ExtractError> {
        let window = match self.connect(app, handoff) {
            Ok(window) => window,
            Err(e) => {
                if self.ctx.desktop.cancel_flag().is_cancelled() {
                    return Err(ExtractError::Interrupted);
                }
                self.warn("connect", format!("{e}; using the top window"));
                handoff.top_window.clone()
            }
        };

        let controls = [ControlRole::CheckBox, ControlRole::Button];
        if !self
            .ctx
            .waiter()
            .wait_controls_available(&window, &controls, self.ctx.config.delays.window_activation())
        {
            self.warn("connect", "filter controls not rendered yet");
        }

        if let Err(e) = self.side_nav(&window) {
            self.warn("side nav", e);
        }
        if let Err(e) = self.filters(&window) {
            self.warn("filters", e);
        }
        if let Err(e) = self.tree_controls(&window) {
            self.warn("tree controls", e);
        }
        let scan = match TreeSelector::new(self.ctx, &window).run() {
            Ok(scan) => {
                if scan.selected.is_empty() {
                    self.warn("tree", "no measurement rows selected");
                }
                scan
            }
            Err(e) => {
                self.warn("tree", e);
                TreeScan::default()
            }
        };
        if let Err(e) = self.focus_table(&window) {
            self.warn("table focus", e);
        }
        if self.ctx.desktop.cancel_flag().is_cancelled() {
            return Err(ExtractError::Interrupted);
        }

        self.trigger_export(&window)?;
        let requested_path = SaveDialog::new(self.ctx).save_as(&handoff.top_window, stem)?;

        Ok(ExportReport {
            warnings: std::mem::take(&mut self.warnings),
            selected: scan.selected,
            requested_path,
        })
    }

    /// Sub-phase 1, with progressive backoff between attempts.
    fn connect(&self, app: &AppHandle, handoff: &HandOff) -> Result<UIElement, AutomationError> {
        let desktop = self.ctx.desktop;
        let locale = self.ctx.locale;
        if let Some(window) = &handoff.configuration_window {
            if window.is_visible().unwrap_or(false) {
                return Ok(window.clone());
            }
        }
        let backoff = Backoff::progressive(CONNECT_ATTEMPTS, self.ctx.config.delays.connect_backoff());
        let window = backoff.retry("connect configuration window", desktop.cancel_flag(), |_| {
            desktop
                .windows_for_pid(app.pid)?
                .into_iter()
                .find(|w| locale.window_title_matches_configuration(&w.name_or_empty()))
                .ok_or_else(|| {
                    AutomationError::ElementNotFound("configuration window".to_string())
                })
        })?;
        if !self
            .ctx
            .waiter()
            .wait_window_ready(&window, self.ctx.config.delays.window_activation())
        {
            debug!("configuration window not reporting ready, continuing");
        }
        info!("connected to configuration window {:?}", window.name_or_empty());
        Ok(window)
    }

    fn find(
        &self,
        window: &UIElement,
        roles: &[ControlRole],
        token: UiToken,
    ) -> Result<UIElement, AutomationError> {
        let locale = self.ctx.locale;
        self.ctx
            .desktop
            .find_by_text(window, roles, |text| locale.matches(text, token))?
            .ok_or_else(|| AutomationError::ElementNotFound(format!("no control matches {token}")))
    }

    /// Sub-phase 2: open the measurements view.
    fn side_nav(&self, window: &UIElement) -> Result<(), AutomationError> {
        let desktop = self.ctx.desktop;
        let entry = self.find(
            window,
            &[
                ControlRole::CheckBox,
                ControlRole::Button,
                ControlRole::Text,
                ControlRole::TreeItem,
            ],
            UiToken::Measurements,
        )?;
        if entry.role() == ControlRole::CheckBox {
            if desktop.set_toggle(&entry, true)? {
                debug!("measurements toggled on");
            }
            Ok(())
        } else {
            desktop.click(&entry)
        }
    }

    /// Sub-phase 3: user-defined aggregation with the configured checkboxes.
    fn filters(&self, window: &UIElement) -> Result<(), AutomationError> {
        let desktop = self.ctx.desktop;
        let user = self.find(window, &[ControlRole::RadioButton], UiToken::User)?;
        match desktop.set_toggle(&user, true) {
            Err(AutomationError::UnsupportedOperation(_)) => desktop.click(&user)?,
            other => {
                other?;
            }
        }

        let filters = &self.ctx.config.filters;
        let wanted = [
            (UiToken::Average, filters.average),
            (UiToken::Minimum, filters.minimum),
            (UiToken::Instantaneous, filters.instantaneous),
            (UiToken::Maximum, filters.maximum),
        ];
        let mut missing = Vec::new();
        let mut failed = Vec::new();
        for (token, desired) in wanted {
            match self.find(window, &[ControlRole::CheckBox], token) {
                Ok(checkbox) => match desktop.set_toggle(&checkbox, desired) {
                    Ok(true) => debug!(token = %token, "set to {desired}"),
                    Ok(false) => {}
                    Err(e) => failed.push(format!("{} ({e})", token.key())),
                },
                Err(_) => missing.push(token.key()),
            }
        }
        let mut problems = Vec::new();
        if !missing.is_empty() {
            problems.push(format!("aggregation checkboxes missing: {}", missing.join(", ")));
        }
        if !failed.is_empty() {
            problems.push(format!("aggregation checkboxes not set: {}", failed.join(", ")));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AutomationError::ElementNotFound(problems.join("; ")))
        }
    }

    /// Sub-phase 4: clear "select all" and expand the whole tree.
    fn tree_controls(&self, window: &UIElement) -> Result<(), AutomationError> {
        let desktop = self.ctx.desktop;
        let select_all = self.find(window, &[ControlRole::CheckBox], UiToken::SelectAll)?;
        desktop.set_toggle(&select_all, false)?;
        let expand_all = self.find(window, &[ControlRole::Button], UiToken::ExpandAll)?;
        desktop.click(&expand_all)
    }

    /// Sub-phase 6: put keyboard focus into the measurements grid.
    fn focus_table(&self, window: &UIElement) -> Result<(), AutomationError> {
        let desktop = self.ctx.desktop;
        let table = match desktop.find_descendants(window, ControlRole::DataGrid)?.into_iter().next() {
            Some(grid) => grid,
            None => desktop
                .find_descendants(window, ControlRole::Table)?
                .into_iter()
                .next()
                .ok_or_else(|| AutomationError::ElementNotFound("measurements table".to_string()))?,
        };
        let rect = desktop.rectangle(&table)?;
        desktop.click_at(rect.left + TABLE_FOCUS_INSET, rect.top)
    }

    /// Sub-phase 7: open the report popup and pick its first entry, the CSV
    /// export. The popup has no accessibility tree, so the entry is clicked by
    /// offset from the pointer.
    fn trigger_export(&self, window: &UIElement) -> Result<(), ExtractError> {
        let desktop = self.ctx.desktop;
        let report = self
            .find(window, &[ControlRole::Button], UiToken::Report)
            .map_err(|e| {
                desktop.dump_tree("report button lookup", window);
                ExtractError::phase(PHASE, format!("report button: {e}"))
            })?;
        desktop
            .click(&report)
            .map_err(|e| ExtractError::phase(PHASE, format!("cannot click report: {e}")))?;

        let (x, y) = match desktop.cursor_position() {
            Ok(position) => position,
            Err(e) => {
                debug!("cursor position unavailable ({e}), using the button center");
                desktop
                    .rectangle(&report)
                    .map(|rect| rect.center())
                    .map_err(|e| ExtractError::phase(PHASE, format!("report button moved: {e}")))?
            }
        };
        desktop
            .click_at(x, y + self.ctx.config.report_menu_offset_px)
            .map_err(|e| ExtractError::phase(PHASE, format!("cannot open CSV export: {e}")))
    }
}
