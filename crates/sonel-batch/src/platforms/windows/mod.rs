//! Windows platform implementation
//!
//! Production backend of the UI layer, built on the Windows UI Automation API
//! through the uiautomation crate.

pub mod element;
pub mod engine;
mod input;
mod types;
mod utils;

pub use element::WindowsUIElement;
pub use engine::WindowsEngine;
