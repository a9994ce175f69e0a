use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use tracing::instrument;

/// Control types the drivers distinguish between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlRole {
    Window,
    Pane,
    Group,
    Button,
    CheckBox,
    RadioButton,
    Text,
    Edit,
    ComboBox,
    Tree,
    TreeItem,
    DataGrid,
    Table,
    List,
    ListItem,
    Menu,
    MenuItem,
    ToolBar,
    Custom,
    Other,
}

impl fmt::Display for ControlRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Screen rectangle in absolute pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Platform-specific element behaviour. Implemented by the Windows backend
/// and by test doubles.
pub trait UIElementImpl: Send + Sync + Debug {
    /// Identity used for equality and hashing within one session.
    fn object_id(&self) -> usize;
    fn runtime_id(&self) -> Result<Vec<i32>, AutomationError>;
    fn role(&self) -> ControlRole;
    fn name(&self) -> Result<String, AutomationError>;
    fn automation_id(&self) -> Result<String, AutomationError>;
    fn bounds(&self) -> Result<Rect, AutomationError>;
    fn is_enabled(&self) -> Result<bool, AutomationError>;
    fn is_visible(&self) -> Result<bool, AutomationError>;
    fn process_id(&self) -> Result<u32, AutomationError>;
    fn children(&self) -> Result<Vec<UIElement>, AutomationError>;
    fn parent(&self) -> Result<Option<UIElement>, AutomationError>;
    /// Descendants in tree pre-order, optionally restricted to one role.
    fn descendants(&self, role: Option<ControlRole>) -> Result<Vec<UIElement>, AutomationError>;
    fn click(&self) -> Result<(), AutomationError>;
    fn double_click(&self) -> Result<(), AutomationError>;
    fn invoke(&self) -> Result<(), AutomationError>;
    fn focus(&self) -> Result<(), AutomationError>;
    /// `None` when the element exposes no toggle or selection state.
    fn toggle_state(&self) -> Result<Option<bool>, AutomationError>;
    fn toggle(&self) -> Result<(), AutomationError>;
    fn clone_box(&self) -> Box<dyn UIElementImpl>;
}

/// Handle to an element of the analyzer's accessibility tree.
pub struct UIElement {
    inner: Box<dyn UIElementImpl>,
}

impl UIElement {
    pub fn new(impl_: Box<dyn UIElementImpl>) -> Self {
        Self { inner: impl_ }
    }

    pub fn object_id(&self) -> usize {
        self.inner.object_id()
    }

    pub fn runtime_id(&self) -> Result<Vec<i32>, AutomationError> {
        self.inner.runtime_id()
    }

    pub fn role(&self) -> ControlRole {
        self.inner.role()
    }

    pub fn name(&self) -> Result<String, AutomationError> {
        self.inner.name()
    }

    /// Name, or an empty string when it cannot be read.
    pub fn name_or_empty(&self) -> String {
        self.inner.name().unwrap_or_default()
    }

    pub fn automation_id(&self) -> Result<String, AutomationError> {
        self.inner.automation_id()
    }

    pub fn bounds(&self) -> Result<Rect, AutomationError> {
        self.inner.bounds()
    }

    pub fn is_enabled(&self) -> Result<bool, AutomationError> {
        self.inner.is_enabled()
    }

    pub fn is_visible(&self) -> Result<bool, AutomationError> {
        self.inner.is_visible()
    }

    pub fn process_id(&self) -> Result<u32, AutomationError> {
        self.inner.process_id()
    }

    pub fn children(&self) -> Result<Vec<UIElement>, AutomationError> {
        self.inner.children()
    }

    pub fn parent(&self) -> Result<Option<UIElement>, AutomationError> {
        self.inner.parent()
    }

    pub fn descendants(&self, role: Option<ControlRole>) -> Result<Vec<UIElement>, AutomationError> {
        self.inner.descendants(role)
    }

    #[instrument(level = "debug", skip(self), fields(name = %self.name_or_empty()))]
    pub fn click(&self) -> Result<(), AutomationError> {
        self.inner.click()
    }

    pub fn double_click(&self) -> Result<(), AutomationError> {
        self.inner.double_click()
    }

    #[instrument(level = "debug", skip(self), fields(name = %self.name_or_empty()))]
    pub fn invoke(&self) -> Result<(), AutomationError> {
        self.inner.invoke()
    }

    pub fn focus(&self) -> Result<(), AutomationError> {
        self.inner.focus()
    }

    pub fn toggle_state(&self) -> Result<Option<bool>, AutomationError> {
        self.inner.toggle_state()
    }

    pub fn toggle(&self) -> Result<(), AutomationError> {
        self.inner.toggle()
    }

    /// Enabled and on screen; read errors count as not clickable.
    pub fn is_clickable(&self) -> bool {
        self.is_enabled().unwrap_or(false) && self.is_visible().unwrap_or(false)
    }
}

impl Debug for UIElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UIElement")
            .field("role", &self.role())
            .field("name", &self.name_or_empty())
            .finish()
    }
}

impl PartialEq for UIElement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.object_id() == other.inner.object_id()
    }
}

impl Eq for UIElement {}

impl std::hash::Hash for UIElement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.object_id().hash(state);
    }
}

impl Clone for UIElement {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
        }
    }
}

/// Snapshot of an element subtree, used for debug dumps around failures.
#[derive(Clone, Serialize)]
pub struct UINode {
    pub role: ControlRole,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub automation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UINode>,
}

impl UINode {
    /// Walk `element` down to `max_depth` levels. Unreadable children are
    /// skipped rather than failing the whole snapshot.
    pub fn capture(element: &UIElement, max_depth: usize) -> UINode {
        let children = if max_depth == 0 {
            Vec::new()
        } else {
            element
                .children()
                .unwrap_or_default()
                .iter()
                .map(|child| UINode::capture(child, max_depth - 1))
                .collect()
        };
        UINode {
            role: element.role(),
            name: element.name_or_empty(),
            automation_id: element.automation_id().unwrap_or_default(),
            bounds: element.bounds().ok(),
            children,
        }
    }

    fn render(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} {:?}", self.role, self.name));
        if !self.automation_id.is_empty() {
            out.push_str(&format!(" #{}", self.automation_id));
        }
        if let Some(b) = self.bounds {
            out.push_str(&format!(
                " [{:.0},{:.0} {:.0}x{:.0}]",
                b.left, b.top, b.width, b.height
            ));
        }
        out.push('\n');
        for child in &self.children {
            child.render(out, depth + 1);
        }
    }
}

impl fmt::Display for UINode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, 0);
        f.write_str(out.trim_end())
    }
}

impl Debug for UINode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_geometry() {
        let r = Rect::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(r.center(), (60.0, 40.0));
        assert!(r.contains(10.0, 20.0));
        assert!(!r.contains(110.0, 20.0));
        assert!(!r.is_empty());
        assert!(Rect::default().is_empty());
    }
}
