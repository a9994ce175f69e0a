//! Windows UI element implementation

use super::types::ThreadSafeWinUIElement;
use super::utils::{control_type_to_role, create_ui_automation_with_com_init, wrap_element};
use crate::element::UIElementImpl;
use crate::{AutomationError, ControlRole, Rect, UIElement};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;
use uiautomation::inputs::Mouse;
use uiautomation::patterns;
use uiautomation::types::{Point, ToggleState, TreeScope};

pub struct WindowsUIElement {
    pub(crate) element: ThreadSafeWinUIElement,
}

impl WindowsUIElement {
    fn raw(&self) -> &uiautomation::UIElement {
        &self.element.0
    }

    fn click_point(&self) -> Result<Point, AutomationError> {
        if let Ok(Some(point)) = self.raw().get_clickable_point() {
            return Ok(point);
        }
        let rect = self.raw().get_bounding_rectangle()?;
        Ok(Point::new(
            rect.get_left() + rect.get_width() / 2,
            rect.get_top() + rect.get_height() / 2,
        ))
    }
}

impl Debug for WindowsUIElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsUIElement")
            .field("name", &self.raw().get_name().unwrap_or_default())
            .finish()
    }
}

impl UIElementImpl for WindowsUIElement {
    fn object_id(&self) -> usize {
        // Runtime ids are unique among live elements; fold them into one word.
        self.raw()
            .get_runtime_id()
            .map(|ids| {
                ids.iter().fold(17usize, |acc, part| {
                    acc.wrapping_mul(31).wrapping_add(*part as u32 as usize)
                })
            })
            .unwrap_or_else(|_| Arc::as_ptr(&self.element.0) as usize)
    }

    fn runtime_id(&self) -> Result<Vec<i32>, AutomationError> {
        Ok(self.raw().get_runtime_id()?)
    }

    fn role(&self) -> ControlRole {
        self.raw()
            .get_control_type()
            .map(control_type_to_role)
            .unwrap_or(ControlRole::Other)
    }

    fn name(&self) -> Result<String, AutomationError> {
        Ok(self.raw().get_name()?)
    }

    fn automation_id(&self) -> Result<String, AutomationError> {
        Ok(self.raw().get_automation_id()?)
    }

    fn bounds(&self) -> Result<Rect, AutomationError> {
        let rect = self.raw().get_bounding_rectangle()?;
        Ok(Rect::new(
            rect.get_left() as f64,
            rect.get_top() as f64,
            rect.get_width() as f64,
            rect.get_height() as f64,
        ))
    }

    fn is_enabled(&self) -> Result<bool, AutomationError> {
        Ok(self.raw().is_enabled()?)
    }

    fn is_visible(&self) -> Result<bool, AutomationError> {
        Ok(!self.raw().is_offscreen()?)
    }

    fn process_id(&self) -> Result<u32, AutomationError> {
        Ok(self.raw().get_process_id()?)
    }

    fn children(&self) -> Result<Vec<UIElement>, AutomationError> {
        let automation = create_ui_automation_with_com_init()?;
        let condition = automation.create_true_condition()?;
        let children = self.raw().find_all(TreeScope::Children, &condition)?;
        Ok(children.into_iter().map(wrap_element).collect())
    }

    fn parent(&self) -> Result<Option<UIElement>, AutomationError> {
        let automation = create_ui_automation_with_com_init()?;
        let walker = automation.get_raw_view_walker()?;
        match walker.get_parent(self.raw()) {
            Ok(parent) => Ok(Some(wrap_element(parent))),
            Err(e) => {
                // No parent means we are at the desktop root
                debug!("TreeWalker get_parent failed: {}", e);
                Ok(None)
            }
        }
    }

    fn descendants(&self, role: Option<ControlRole>) -> Result<Vec<UIElement>, AutomationError> {
        let automation = create_ui_automation_with_com_init()?;
        let condition = automation.create_true_condition()?;
        // FindAll returns descendants in document (pre-)order.
        let found = self.raw().find_all(TreeScope::Descendants, &condition)?;
        Ok(found
            .into_iter()
            .filter(|e| match role {
                Some(wanted) => e
                    .get_control_type()
                    .map(|ct| control_type_to_role(ct) == wanted)
                    .unwrap_or(false),
                None => true,
            })
            .map(wrap_element)
            .collect())
    }

    fn click(&self) -> Result<(), AutomationError> {
        self.raw().try_focus();
        if self.raw().click().is_ok() {
            return Ok(());
        }
        let point = self.click_point()?;
        debug!("element click failed, clicking at ({}, {})", point.get_x(), point.get_y());
        Mouse::default().click(point)?;
        Ok(())
    }

    fn double_click(&self) -> Result<(), AutomationError> {
        self.raw().try_focus();
        let point = self.click_point()?;
        Mouse::default().double_click(point)?;
        Ok(())
    }

    fn invoke(&self) -> Result<(), AutomationError> {
        let invoke_pat = self
            .raw()
            .get_pattern::<patterns::UIInvokePattern>()
            .map_err(|e| {
                AutomationError::UnsupportedOperation(format!(
                    "Element does not support InvokePattern: {e}"
                ))
            })?;
        Ok(invoke_pat.invoke()?)
    }

    fn focus(&self) -> Result<(), AutomationError> {
        Ok(self.raw().set_focus()?)
    }

    fn toggle_state(&self) -> Result<Option<bool>, AutomationError> {
        if let Ok(pattern) = self.raw().get_pattern::<patterns::UITogglePattern>() {
            let state = pattern.get_toggle_state()?;
            return Ok(Some(state == ToggleState::On));
        }
        // Radio buttons report their state through SelectionItemPattern
        if let Ok(pattern) = self.raw().get_pattern::<patterns::UISelectionItemPattern>() {
            return Ok(Some(pattern.is_selected()?));
        }
        Ok(None)
    }

    fn toggle(&self) -> Result<(), AutomationError> {
        if let Ok(pattern) = self.raw().get_pattern::<patterns::UITogglePattern>() {
            return Ok(pattern.toggle()?);
        }
        if let Ok(pattern) = self.raw().get_pattern::<patterns::UISelectionItemPattern>() {
            return Ok(pattern.select()?);
        }
        // Some checkbox glyphs only react to a real click
        self.click()
    }

    fn clone_box(&self) -> Box<dyn UIElementImpl> {
        Box::new(WindowsUIElement {
            element: self.element.clone(),
        })
    }
}
