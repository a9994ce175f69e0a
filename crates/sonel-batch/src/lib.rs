//! Batch CSV extraction from the Sonel Analysis desktop analyzer.
//!
//! For every capture file in an input directory the analyzer is started,
//! driven through its accessibility tree to export the measurements to CSV,
//! and the outcome is written to a JSON registry so reruns skip finished
//! captures.
//!
//! The UI is reached through [`platforms::AccessibilityEngine`] and
//! [`element::UIElementImpl`]; the production backend is Windows UI
//! Automation, and the drivers only ever see the traits.

pub mod config;
pub mod desktop;
pub mod detector;
pub mod drivers;
pub mod element;
pub mod errors;
pub mod locale;
pub mod orchestrator;
pub mod platforms;
pub mod registry;
pub mod retry;
pub mod supervisor;
pub mod wait;
#[cfg(test)]
mod tests;

pub use config::{AggregationFilters, Config, Delays};
pub use desktop::Desktop;
pub use detector::{csv_file_name, Detection, DetectionKind, FileDetector};
pub use element::{ControlRole, Rect, UIElement, UIElementImpl, UINode};
pub use errors::{AutomationError, ExtractError, LocaleError};
pub use locale::{Language, LocaleDictionary, UiToken};
pub use orchestrator::{
    list_captures, pending_captures, BatchOrchestrator, CaptureOutcome, CaptureStatus, RunOptions, RunResult,
};
pub use platforms::{create_engine, AccessibilityEngine};
pub use registry::{Registry, RegistryEntry, RegistryStats};
pub use retry::{Backoff, CancellationFlag};
pub use supervisor::{AppHandle, ProcessHost, ProcessInfo, ProcessSupervisor, SystemProcessHost};
pub use wait::Waiter;
