use crate::{AutomationError, UIElement};
use std::sync::Arc;

/// Desktop-level operations of an accessibility backend. Element-level
/// behaviour lives on [`crate::element::UIElementImpl`].
pub trait AccessibilityEngine: Send + Sync {
    /// Get the root UI element (the desktop)
    fn get_root_element(&self) -> Result<UIElement, AutomationError>;

    /// All top-level windows currently on the desktop
    fn top_level_windows(&self) -> Result<Vec<UIElement>, AutomationError>;

    /// Left click at absolute screen coordinates
    fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    /// Mouse-wheel ticks at absolute screen coordinates; negative scrolls down
    fn scroll_at(&self, x: f64, y: f64, ticks: i32) -> Result<(), AutomationError>;

    /// Send a key sequence to the focused control
    fn send_keys(&self, keys: &str) -> Result<(), AutomationError>;

    /// Replace the clipboard text
    fn set_clipboard_text(&self, text: &str) -> Result<(), AutomationError>;

    /// Current pointer position
    fn cursor_position(&self) -> Result<(f64, f64), AutomationError>;
}

/// Key sequences understood by [`AccessibilityEngine::send_keys`].
pub mod keys {
    pub const SELECT_ALL: &str = "{ctrl}(a)";
    pub const DELETE: &str = "{delete}";
    pub const PASTE: &str = "{ctrl}(v)";
}

#[cfg(target_os = "windows")]
pub mod windows;

/// Create the accessibility engine for the current platform
pub fn create_engine() -> Result<Arc<dyn AccessibilityEngine>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsEngine::new()?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(AutomationError::UnsupportedPlatform(
            "the analyzer only runs on Windows".to_string(),
        ))
    }
}
