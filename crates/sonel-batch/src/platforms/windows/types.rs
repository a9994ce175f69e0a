//! RAII and thread-safety wrappers for the Windows backend

use crate::AutomationError;
use std::sync::Arc;

/// Thread-safe wrapper for the UIAutomation COM object
pub(crate) struct ThreadSafeWinUIAutomation(pub(crate) uiautomation::UIAutomation);

// Safety: UIAutomation is thread-safe after proper COM initialization
unsafe impl Send for ThreadSafeWinUIAutomation {}
unsafe impl Sync for ThreadSafeWinUIAutomation {}

/// Thread-safe wrapper for UIElement
#[derive(Clone)]
pub(crate) struct ThreadSafeWinUIElement(pub(crate) Arc<uiautomation::UIElement>);

// Safety: UIElement is thread-safe when wrapped properly
unsafe impl Send for ThreadSafeWinUIElement {}
unsafe impl Sync for ThreadSafeWinUIElement {}

// UIA_E_ELEMENTNOTAVAILABLE
const UIA_E_ELEMENT_NOT_AVAILABLE: i32 = 0x80040201u32 as i32;
// UIA_E_TIMEOUT
const UIA_E_TIMEOUT: i32 = 0x80131505u32 as i32;
// E_ACCESSDENIED
const E_ACCESS_DENIED: i32 = 0x80070005u32 as i32;

impl From<uiautomation::Error> for AutomationError {
    fn from(error: uiautomation::Error) -> Self {
        let code = error.code();
        match code {
            UIA_E_ELEMENT_NOT_AVAILABLE => AutomationError::ElementStale(error.to_string()),
            E_ACCESS_DENIED => AutomationError::PermissionDenied(error.to_string()),
            _ => AutomationError::UIAutomationAPIError {
                message: error.to_string(),
                com_error: Some(code),
                operation: String::new(),
                is_retryable: code == UIA_E_TIMEOUT,
            },
        }
    }
}
