//! Polling waits. None of these fail: a timeout or an interrupt is reported as
//! `false` / `None` and the caller decides what that means.

use crate::desktop::Desktop;
use crate::element::{ControlRole, UIElement};
use crate::locale::{LocaleDictionary, UiToken};
use std::time::{Duration, Instant};
use tracing::debug;

/// Children inspected when deciding whether a window has rendered.
const READY_CHILD_SAMPLE: usize = 5;

pub struct Waiter<'a> {
    desktop: &'a Desktop,
    interval: Duration,
}

impl<'a> Waiter<'a> {
    pub fn new(desktop: &'a Desktop, interval: Duration) -> Self {
        Self { desktop, interval }
    }

    /// Evaluate `probe` every interval until it yields a value, the timeout
    /// elapses or the run is interrupted. The probe always runs at least once.
    pub fn poll_until<T>(&self, timeout: Duration, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
        let cancel = self.desktop.cancel_flag();
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(value) = probe() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if !cancel.sleep(self.interval.min(deadline - now)) {
                return None;
            }
        }
    }

    /// Enabled, visible and at least one of the first few children visible.
    pub fn wait_window_ready(&self, window: &UIElement, timeout: Duration) -> bool {
        let ready = self.poll_until(timeout, || {
            let shown = window.is_enabled().unwrap_or(false) && window.is_visible().unwrap_or(false);
            if !shown {
                return None;
            }
            let children = window.children().ok()?;
            children
                .iter()
                .take(READY_CHILD_SAMPLE)
                .any(|child| child.is_visible().unwrap_or(false))
                .then_some(())
        });
        if ready.is_none() {
            debug!("window {:?} not ready after {:?}", window.name_or_empty(), timeout);
        }
        ready.is_some()
    }

    /// Every role in `roles` has at least one descendant under `window`.
    pub fn wait_controls_available(
        &self,
        window: &UIElement,
        roles: &[ControlRole],
        timeout: Duration,
    ) -> bool {
        self.poll_until(timeout, || {
            roles
                .iter()
                .all(|role| {
                    window
                        .descendants(Some(*role))
                        .map(|found| !found.is_empty())
                        .unwrap_or(false)
                })
                .then_some(())
        })
        .is_some()
    }

    /// A button whose text matches `token` and that is enabled and visible.
    pub fn wait_button_clickable(
        &self,
        window: &UIElement,
        locale: &LocaleDictionary,
        token: UiToken,
        timeout: Duration,
    ) -> Option<UIElement> {
        self.poll_until(timeout, || {
            window
                .descendants(Some(ControlRole::Button))
                .ok()?
                .into_iter()
                .find(|button| locale.matches(&button.name_or_empty(), token) && button.is_clickable())
        })
    }

    /// A window other than `parent`, nested under it or a top-level window of
    /// the same process, that satisfies `predicate`.
    pub fn wait_dialog(
        &self,
        parent: &UIElement,
        predicate: impl Fn(&UIElement) -> bool,
        timeout: Duration,
    ) -> Option<UIElement> {
        let pid = parent.process_id().ok();
        self.poll_until(timeout, || {
            let mut candidates = self.desktop.windows_under(parent).unwrap_or_default();
            if let Some(pid) = pid {
                candidates.extend(self.desktop.windows_for_pid(pid).unwrap_or_default());
            }
            candidates
                .into_iter()
                .filter(|window| window != parent)
                .find(|window| predicate(window))
        })
    }
}
