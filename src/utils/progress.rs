use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// Spinners for long network rounds, only drawn when stderr is a terminal
pub struct ProgressTracker {
    enabled: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            enabled: std::io::stderr().is_terminal(),
        }
    }

    /// A tracker that never draws anything
    pub fn hidden() -> Self {
        Self { enabled: false }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} ({elapsed})") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
