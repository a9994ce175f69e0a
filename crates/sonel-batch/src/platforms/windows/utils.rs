//! Utility functions and type conversions for the Windows backend

use super::element::WindowsUIElement;
use super::types::ThreadSafeWinUIElement;
use crate::{AutomationError, ControlRole, UIElement};
use std::sync::Arc;
use uiautomation::controls::ControlType;
use uiautomation::UIAutomation;
use windows::core::HRESULT;
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

/// Wrap a raw uiautomation element
pub(crate) fn wrap_element(element: uiautomation::UIElement) -> UIElement {
    #[allow(clippy::arc_with_non_send_sync)]
    let arc_ele = ThreadSafeWinUIElement(Arc::new(element));
    UIElement::new(Box::new(WindowsUIElement { element: arc_ele }))
}

/// Create a UIAutomation instance, initializing COM for the calling thread
pub(crate) fn create_ui_automation_with_com_init() -> Result<UIAutomation, AutomationError> {
    unsafe {
        let hr = CoInitializeEx(None, COINIT_MULTITHREADED);
        if hr.is_err() && hr != HRESULT(0x80010106u32 as i32) {
            // Only return error if it's not the "already initialized" case
            return Err(AutomationError::PlatformError(format!(
                "Failed to initialize COM: {hr}"
            )));
        }
    }

    UIAutomation::new_direct().map_err(|e| AutomationError::PlatformError(e.to_string()))
}

/// Maps Windows control types to the roles the drivers care about
pub(crate) fn control_type_to_role(control_type: ControlType) -> ControlRole {
    match control_type {
        ControlType::Window => ControlRole::Window,
        ControlType::Pane => ControlRole::Pane,
        ControlType::Group => ControlRole::Group,
        ControlType::Button | ControlType::SplitButton => ControlRole::Button,
        ControlType::CheckBox => ControlRole::CheckBox,
        ControlType::RadioButton => ControlRole::RadioButton,
        ControlType::Text => ControlRole::Text,
        ControlType::Edit => ControlRole::Edit,
        ControlType::ComboBox => ControlRole::ComboBox,
        ControlType::Tree => ControlRole::Tree,
        ControlType::TreeItem => ControlRole::TreeItem,
        ControlType::DataGrid => ControlRole::DataGrid,
        ControlType::Table => ControlRole::Table,
        ControlType::List => ControlRole::List,
        ControlType::ListItem | ControlType::DataItem => ControlRole::ListItem,
        ControlType::Menu => ControlRole::Menu,
        ControlType::MenuItem => ControlRole::MenuItem,
        ControlType::ToolBar => ControlRole::ToolBar,
        ControlType::Custom => ControlRole::Custom,
        _ => ControlRole::Other,
    }
}
