//! aptpilot - automated, robust apt mirror selection
//!
//! Keeps the package-source configuration of Debian-family systems pointed at
//! a healthy mirror:
//! - Concurrent probing of candidate mirrors for availability and speed
//! - Ranking by availability, update status, freshness and bandwidth
//! - EOL detection with fallback to the archival mirror
//! - Self-healing `apt-get update` with mirror switching and backoff

// Use mimalloc for better memory performance
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod cli;
pub mod core;
pub mod registry;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use core::{
    candidate::{CandidateMirror, SortKey},
    config::AptPilotConfig,
    context::{ChrootContext, LocalContext, SystemContext},
    ranking::RankedMirrors,
    releases::{DistributorId, Release, ReleaseCatalog},
    updater::{MirrorUpdater, UpdaterSettings},
    validator::MirrorStatus,
};

pub use registry::{
    BackendRegistry, MirrorBackend,
    client::{FetchError, HttpTransport, ProbeClient, ProbeResult, Transport},
};

pub use utils::{fs::atomic_write, progress::ProgressTracker};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AptPilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("{0} platform is unsupported! (only Debian, Ubuntu and Linux Mint are supported)")]
    UnsupportedPlatform(String),

    #[error("Failed to determine current mirror in {0}")]
    CurrentMirrorUnknown(String),

    #[error("Failed to determine the distribution codename using {0}")]
    CodenameUnknown(String),

    #[error("{0:?} doesn't match a known Debian, Ubuntu or Linux Mint release")]
    UnknownRelease(String),

    #[error("{value:?} matches {count} releases, refusing to guess")]
    AmbiguousRelease { value: String, count: usize },

    #[error("'{0}' is not a valid mirror URL")]
    InvalidMirrorUrl(String),

    #[error("Mirror discovery failed: {0}")]
    Discovery(String),

    #[error("It looks like all {0} mirrors are unavailable!")]
    AllMirrorsUnavailable(usize),

    #[error(
        "Failed to update package lists because the current release ({0}) is end of life \
         and switching mirrors is not allowed"
    )]
    ReleaseIsEol(String),

    #[error("Failed to update package lists {0} consecutive times")]
    UpdateExhausted(u32),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Chroot error: {0}")]
    Chroot(String),
}

pub type Result<T> = std::result::Result<T, AptPilotError>;

/// Global constants for tuning the probe and update behaviour
pub mod constants {
    use std::time::Duration;

    /// Default limit on the number of mirrors to rank
    pub const MAX_MIRRORS: usize = 50;
    /// Default width of the URL column in `aptpilot list`
    pub const URL_CHAR_LEN: usize = 34;
    /// Per-request timeout for mirror probes
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
    /// Attempts made by `fetch_url` when retrying is enabled
    pub const FETCH_ATTEMPTS: u32 = 3;
    /// Attempts made by the smart update loop
    pub const UPDATE_ATTEMPTS: u32 = 10;
    /// Pessimistic staleness assumed for mirrors without data (4 weeks)
    pub const LAST_UPDATED_DEFAULT: i64 = 60 * 60 * 24 * 7 * 4;
    /// First backoff delay of the smart update loop
    pub const INITIAL_BACKOFF: Duration = Duration::from_secs(10);
    /// Above this delay the backoff grows by a third instead of doubling
    pub const BACKOFF_DOUBLING_LIMIT: Duration = Duration::from_secs(120);
    /// Upper bound on a single backoff delay
    pub const MAX_BACKOFF: Duration = Duration::from_secs(600);
    pub const USER_AGENT: &str = concat!("aptpilot/", env!("CARGO_PKG_VERSION"));
}

/// Default probe concurrency: `max(4, 2 x cpus)`
pub fn default_concurrency() -> usize {
    std::cmp::max(4, num_cpus::get() * 2)
}
