//! Windows accessibility engine

use super::input;
use super::types::ThreadSafeWinUIAutomation;
use super::utils::{create_ui_automation_with_com_init, wrap_element};
use crate::platforms::AccessibilityEngine;
use crate::{AutomationError, UIElement};
use std::sync::Arc;
use uiautomation::types::TreeScope;

pub struct WindowsEngine {
    pub(crate) automation: Arc<ThreadSafeWinUIAutomation>,
}

impl WindowsEngine {
    pub fn new() -> Result<Self, AutomationError> {
        let automation = create_ui_automation_with_com_init()?;
        Ok(Self {
            automation: Arc::new(ThreadSafeWinUIAutomation(automation)),
        })
    }
}

impl AccessibilityEngine for WindowsEngine {
    fn get_root_element(&self) -> Result<UIElement, AutomationError> {
        Ok(wrap_element(self.automation.0.get_root_element()?))
    }

    fn top_level_windows(&self) -> Result<Vec<UIElement>, AutomationError> {
        let root = self.automation.0.get_root_element()?;
        let condition = self.automation.0.create_true_condition()?;
        let children = root.find_all(TreeScope::Children, &condition)?;
        Ok(children.into_iter().map(wrap_element).collect())
    }

    fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        input::click_at(x, y)
    }

    fn scroll_at(&self, x: f64, y: f64, ticks: i32) -> Result<(), AutomationError> {
        input::wheel_at(x, y, ticks)
    }

    fn send_keys(&self, keys: &str) -> Result<(), AutomationError> {
        input::send_keys(keys)
    }

    fn set_clipboard_text(&self, text: &str) -> Result<(), AutomationError> {
        input::set_clipboard_text(text)
    }

    fn cursor_position(&self) -> Result<(f64, f64), AutomationError> {
        input::cursor_position()
    }
}
