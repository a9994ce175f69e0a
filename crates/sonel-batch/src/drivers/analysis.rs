//! Phase 1: the analysis window.
//!
//! Finds the window the analyzer opens for a capture, expands the
//! configuration node of its tree and opens the analysis view, which brings up
//! the configuration window handled by phase 2.

use super::DriverContext;
use crate::element::{ControlRole, UIElement};
use crate::errors::ExtractError;
use crate::locale::UiToken;
use crate::supervisor::{AppHandle, ProcessSupervisor};
use tracing::{debug, info, instrument, warn};

const PHASE: &str = "analysis window";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Disconnected,
    Connected,
    NodeFound,
    Expanded,
    HandedOff,
    Failed,
}

/// Windows passed on to phase 2.
#[derive(Debug, Clone)]
pub struct HandOff {
    pub top_window: UIElement,
    pub analysis_window: UIElement,
    /// Present when the configuration window was seen before phase 1 ended.
    pub configuration_window: Option<UIElement>,
}

pub struct AnalysisWindowDriver<'a> {
    ctx: DriverContext<'a>,
    state: AnalysisState,
}

impl<'a> AnalysisWindowDriver<'a> {
    pub fn new(ctx: DriverContext<'a>) -> Self {
        Self {
            ctx,
            state: AnalysisState::Disconnected,
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    fn fail(&mut self, reason: impl Into<String>) -> ExtractError {
        self.state = AnalysisState::Failed;
        ExtractError::phase(PHASE, reason)
    }

    #[instrument(skip_all, fields(phase = PHASE, pid = app.pid))]
    pub fn run(
        &mut self,
        app: &AppHandle,
        supervisor: &ProcessSupervisor,
    ) -> Result<HandOff, ExtractError> {
        let (top_window, window) = self.connect(app, supervisor)?;
        let node = match self.locate_node(&window) {
            Some(node) => node,
            None => {
                self.ctx.desktop.dump_tree("configuration node lookup", &window);
                return Err(self.fail("configuration node not found"));
            }
        };
        self.expand(&node)?;
        let configuration_window = self.invoke_analysis(&window, &top_window)?;
        Ok(HandOff {
            top_window,
            analysis_window: window,
            configuration_window,
        })
    }

    fn connect(
        &mut self,
        app: &AppHandle,
        supervisor: &ProcessSupervisor,
    ) -> Result<(UIElement, UIElement), ExtractError> {
        let locale = self.ctx.locale;
        let timeout = self.ctx.config.delays.window_activation();
        let waiter = self.ctx.waiter();

        let found = waiter.poll_until(timeout, || {
            let windows = supervisor.enumerate_windows(self.ctx.desktop, app);
            let top = windows.first()?.clone();
            if let Some(window) = windows
                .iter()
                .find(|w| locale.window_title_matches_analysis(&w.name_or_empty()))
            {
                return Some((top, window.clone()));
            }
            // Some analyzer versions render the analysis view in the top window itself.
            locale
                .title_has_analysis_keyword(&top.name_or_empty())
                .then(|| (top.clone(), top))
        });

        let Some((top, window)) = found else {
            if self.ctx.desktop.cancel_flag().is_cancelled() {
                self.state = AnalysisState::Failed;
                return Err(ExtractError::Interrupted);
            }
            self.ctx.desktop.dump_desktop("analysis window lookup");
            return Err(self.fail(format!(
                "no analysis window for pid {} within {:?}",
                app.pid, timeout
            )));
        };

        if !waiter.wait_window_ready(&window, timeout) {
            warn!("analysis window {:?} never reported ready", window.name_or_empty());
        }
        info!("connected to analysis window {:?}", window.name_or_empty());
        self.state = AnalysisState::Connected;
        Ok((top, window))
    }

    fn locate_node(&mut self, window: &UIElement) -> Option<UIElement> {
        let locale = self.ctx.locale;
        let desktop = self.ctx.desktop;
        let node = self
            .ctx
            .waiter()
            .poll_until(self.ctx.config.delays.window_activation(), || {
                desktop
                    .find_descendants(window, ControlRole::TreeItem)
                    .ok()?
                    .into_iter()
                    .find(|item| locale.matches(&item.name_or_empty(), UiToken::Configuration))
            })?;
        debug!(token = %UiToken::Configuration, "found node {:?}", node.name_or_empty());
        self.state = AnalysisState::NodeFound;
        Some(node)
    }

    /// The analyzer expands the node on a body click, not on its toggle glyph.
    fn expand(&mut self, node: &UIElement) -> Result<(), ExtractError> {
        if let Err(e) = self.ctx.desktop.click_center(node) {
            return Err(self.fail(format!("cannot click configuration node: {e}")));
        }
        self.state = AnalysisState::Expanded;
        Ok(())
    }

    fn invoke_analysis(
        &mut self,
        window: &UIElement,
        top_window: &UIElement,
    ) -> Result<Option<UIElement>, ExtractError> {
        let timeout = self.ctx.config.delays.window_activation();
        let waiter = self.ctx.waiter();
        let Some(button) =
            waiter.wait_button_clickable(window, self.ctx.locale, UiToken::AnalysisData, timeout)
        else {
            self.ctx.desktop.dump_tree("analysis data button lookup", window);
            return Err(self.fail(format!(
                "no clickable {} button",
                UiToken::AnalysisData
            )));
        };
        if let Err(e) = self.ctx.desktop.invoke(&button) {
            return Err(self.fail(format!("cannot invoke {}: {e}", UiToken::AnalysisData)));
        }

        let locale = self.ctx.locale;
        let configuration = waiter.wait_dialog(
            top_window,
            |w| locale.window_title_matches_configuration(&w.name_or_empty()),
            timeout,
        );
        match &configuration {
            Some(w) => info!("configuration window opened: {:?}", w.name_or_empty()),
            None => warn!("configuration window not seen yet; phase 2 will keep looking"),
        }
        self.state = AnalysisState::HandedOff;
        Ok(configuration)
    }
}
