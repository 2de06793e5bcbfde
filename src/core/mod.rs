//! Mirror ranking and the adaptive update engine
//!
//! Candidate scoring, the two-round ranking, EOL resolution, mirror
//! validation and the smart update loop, plus the sources list, release
//! catalog and execution context they work on.

pub mod candidate;
pub mod chroot;
pub mod config;
pub mod context;
pub mod eol;
pub mod ranking;
pub mod releases;
pub mod smart_update;
pub mod sources_list;
pub mod updater;
pub mod validator;
