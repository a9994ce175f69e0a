//! Synchronous facade over the accessibility engine.
//!
//! The phase drivers never talk to the engine or to raw elements directly for
//! anything that can fail transiently; they go through [`Desktop`], which
//! retries stale or timed-out operations and paces clicks.

use crate::config::Config;
use crate::element::{ControlRole, Rect, UIElement, UINode};
use crate::errors::AutomationError;
use crate::platforms::{keys, AccessibilityEngine};
use crate::retry::{Backoff, CancellationFlag};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const TRANSIENT_ATTEMPTS: u32 = 3;
const FOCUS_ATTEMPTS: u32 = 3;
/// Depth of window searches below a root; MDI children sit two levels down.
const WINDOW_SEARCH_DEPTH: usize = 6;
const DUMP_DEPTH: usize = 8;

pub struct Desktop {
    engine: Arc<dyn AccessibilityEngine>,
    cancel: CancellationFlag,
    between_clicks: Duration,
    transient_retry: Duration,
    focus_retry: Duration,
    debug: bool,
}

impl Desktop {
    pub fn new(engine: Arc<dyn AccessibilityEngine>, config: &Config, cancel: CancellationFlag) -> Self {
        Self {
            engine,
            cancel,
            between_clicks: config.delays.between_clicks(),
            transient_retry: config.delays.transient_retry(),
            focus_retry: config.delays.focus_retry(),
            debug: config.debug,
        }
    }

    pub fn cancel_flag(&self) -> &CancellationFlag {
        &self.cancel
    }

    fn with_retry<T>(
        &self,
        what: &str,
        op: impl FnMut(u32) -> Result<T, AutomationError>,
    ) -> Result<T, AutomationError> {
        Backoff::fixed(TRANSIENT_ATTEMPTS, self.transient_retry).retry_if(
            what,
            &self.cancel,
            |e: &AutomationError| e.is_transient(),
            op,
        )
    }

    fn pause_after_click(&self) {
        self.cancel.sleep(self.between_clicks);
    }

    pub fn root(&self) -> Result<UIElement, AutomationError> {
        self.engine.get_root_element()
    }

    pub fn top_level_windows(&self) -> Result<Vec<UIElement>, AutomationError> {
        self.with_retry("top_level_windows", |_| self.engine.top_level_windows())
    }

    /// Descendants of `root` with the given role, in tree pre-order.
    pub fn find_descendants(
        &self,
        root: &UIElement,
        role: ControlRole,
    ) -> Result<Vec<UIElement>, AutomationError> {
        self.with_retry("find_descendants", |_| root.descendants(Some(role)))
    }

    /// First descendant among `roles` whose text satisfies `predicate`. Roles
    /// are tried in the given order.
    pub fn find_by_text(
        &self,
        root: &UIElement,
        roles: &[ControlRole],
        predicate: impl Fn(&str) -> bool,
    ) -> Result<Option<UIElement>, AutomationError> {
        for role in roles {
            let found = self
                .find_descendants(root, *role)?
                .into_iter()
                .find(|element| predicate(&element.name_or_empty()));
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Breadth-first search for a window (including `root`) whose title
    /// satisfies `predicate`.
    pub fn find_window_by_predicate(
        &self,
        root: &UIElement,
        predicate: impl Fn(&str) -> bool,
    ) -> Result<UIElement, AutomationError> {
        let mut queue = VecDeque::from([(root.clone(), 0usize)]);
        while let Some((element, depth)) = queue.pop_front() {
            if is_window_like(element.role()) && predicate(&element.name_or_empty()) {
                return Ok(element);
            }
            if depth >= WINDOW_SEARCH_DEPTH {
                continue;
            }
            match element.children() {
                Ok(children) => queue.extend(children.into_iter().map(|c| (c, depth + 1))),
                Err(e) => debug!("skipping unreadable subtree: {e}"),
            }
        }
        Err(AutomationError::ElementNotFound(format!(
            "no window under {:?} matches",
            root.name_or_empty()
        )))
    }

    /// `parent` itself (when it is a window) followed by every window below it.
    pub fn windows_under(&self, parent: &UIElement) -> Result<Vec<UIElement>, AutomationError> {
        let mut out = Vec::new();
        if is_window_like(parent.role()) {
            out.push(parent.clone());
        }
        out.extend(self.find_descendants(parent, ControlRole::Window)?);
        Ok(out)
    }

    /// Every top-level window owned by `pid` plus the windows nested in them.
    pub fn windows_for_pid(&self, pid: u32) -> Result<Vec<UIElement>, AutomationError> {
        let mut out = Vec::new();
        for top in self.top_level_windows()? {
            if top.process_id().ok() != Some(pid) {
                continue;
            }
            for window in self.windows_under(&top)? {
                if !out.contains(&window) {
                    out.push(window);
                }
            }
        }
        Ok(out)
    }

    #[instrument(level = "debug", skip(self, element), fields(name = %element.name_or_empty()))]
    pub fn click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.with_retry("click", |_| element.click())?;
        self.pause_after_click();
        Ok(())
    }

    pub fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        debug!("click at ({x:.0}, {y:.0})");
        self.with_retry("click_at", |_| self.engine.click_at(x, y))?;
        self.pause_after_click();
        Ok(())
    }

    /// Click the center of the element's rectangle rather than the element.
    pub fn click_center(&self, element: &UIElement) -> Result<(), AutomationError> {
        let (x, y) = self.rectangle(element)?.center();
        self.click_at(x, y)
    }

    pub fn double_click(&self, element: &UIElement) -> Result<(), AutomationError> {
        self.with_retry("double_click", |_| element.double_click())?;
        self.pause_after_click();
        Ok(())
    }

    pub fn toggle_state(&self, element: &UIElement) -> Result<Option<bool>, AutomationError> {
        self.with_retry("toggle_state", |_| element.toggle_state())
    }

    /// Bring a checkbox-like element to `desired`. Returns whether it had to
    /// be toggled. Elements without a readable state are rejected.
    pub fn set_toggle(&self, element: &UIElement, desired: bool) -> Result<bool, AutomationError> {
        match self.toggle_state(element)? {
            Some(current) if current == desired => Ok(false),
            Some(_) => {
                self.with_retry("toggle", |_| element.toggle())?;
                self.pause_after_click();
                Ok(true)
            }
            None => Err(AutomationError::UnsupportedOperation(format!(
                "{:?} exposes no toggle state",
                element.name_or_empty()
            ))),
        }
    }

    /// Accessibility invoke; elements without an invoke pattern get a click.
    #[instrument(level = "debug", skip(self, element), fields(name = %element.name_or_empty()))]
    pub fn invoke(&self, element: &UIElement) -> Result<(), AutomationError> {
        match self.with_retry("invoke", |_| element.invoke()) {
            Err(AutomationError::UnsupportedOperation(reason)) => {
                debug!("invoke unsupported ({reason}), clicking instead");
                self.click(element)
            }
            Err(e) => Err(e),
            Ok(()) => {
                self.pause_after_click();
                Ok(())
            }
        }
    }

    /// Mouse wheel at the anchor; negative ticks scroll down.
    pub fn scroll(&self, anchor_x: f64, anchor_y: f64, ticks: i32) -> Result<(), AutomationError> {
        debug!("scroll {ticks} at ({anchor_x:.0}, {anchor_y:.0})");
        self.with_retry("scroll", |_| self.engine.scroll_at(anchor_x, anchor_y, ticks))
    }

    pub fn rectangle(&self, element: &UIElement) -> Result<Rect, AutomationError> {
        self.with_retry("rectangle", |_| element.bounds())
    }

    pub fn text(&self, element: &UIElement) -> Result<String, AutomationError> {
        self.with_retry("text", |_| element.name())
    }

    pub fn automation_id(&self, element: &UIElement) -> Result<String, AutomationError> {
        self.with_retry("automation_id", |_| element.automation_id())
    }

    pub fn set_focus(&self, element: &UIElement) -> Result<(), AutomationError> {
        Backoff::fixed(FOCUS_ATTEMPTS, self.focus_retry).retry("set_focus", &self.cancel, |_| {
            element.focus()
        })
    }

    pub fn send_keys(&self, keys: &str) -> Result<(), AutomationError> {
        self.engine.send_keys(keys)
    }

    pub fn set_clipboard(&self, text: &str) -> Result<(), AutomationError> {
        self.engine.set_clipboard_text(text)
    }

    /// Replace the focused control's content with the clipboard.
    pub fn replace_focused_with_clipboard(&self) -> Result<(), AutomationError> {
        self.engine.send_keys(keys::SELECT_ALL)?;
        self.engine.send_keys(keys::DELETE)?;
        self.engine.send_keys(keys::PASTE)
    }

    pub fn cursor_position(&self) -> Result<(f64, f64), AutomationError> {
        self.engine.cursor_position()
    }

    /// Log the subtree below `element` when debug dumps are enabled.
    pub fn dump_tree(&self, label: &str, element: &UIElement) {
        if !self.debug {
            return;
        }
        let node = UINode::capture(element, DUMP_DEPTH);
        debug!("accessibility tree at {label}:\n{node}");
    }

    /// Dump the whole desktop, for failures that happen before any window is
    /// known.
    pub fn dump_desktop(&self, label: &str) {
        if !self.debug {
            return;
        }
        match self.root() {
            Ok(root) => self.dump_tree(label, &root),
            Err(e) => warn!("cannot dump desktop at {label}: {e}"),
        }
    }
}

fn is_window_like(role: ControlRole) -> bool {
    matches!(role, ControlRole::Window)
}
