//! State machines for the analyzer's two windows.

pub mod analysis;
pub mod configuration;
mod save_dialog;
mod tree;

pub use analysis::{AnalysisState, AnalysisWindowDriver, HandOff};
pub use configuration::{ConfigurationWindowDriver, ExportReport};
pub use tree::{TreeScan, SCROLL_TICKS};

use crate::config::Config;
use crate::desktop::Desktop;
use crate::locale::LocaleDictionary;
use crate::wait::Waiter;

/// What every driver borrows for the duration of one capture.
#[derive(Clone, Copy)]
pub struct DriverContext<'a> {
    pub desktop: &'a Desktop,
    pub locale: &'a LocaleDictionary,
    pub config: &'a Config,
}

impl<'a> DriverContext<'a> {
    pub fn new(desktop: &'a Desktop, locale: &'a LocaleDictionary, config: &'a Config) -> Self {
        Self {
            desktop,
            locale,
            config,
        }
    }

    pub fn waiter(&self) -> Waiter<'a> {
        Waiter::new(self.desktop, self.config.poll_interval())
    }
}
