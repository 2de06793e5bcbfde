//! Small helpers shared by the core and the CLI

pub mod fs;
pub mod progress;
