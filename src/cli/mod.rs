//! One module per command line action

pub mod best;
pub mod change;
pub mod chroot;
pub mod current;
pub mod list;
pub mod update;

use crate::core::config::AptPilotConfig;
use crate::core::context::LocalContext;
use crate::core::releases::ReleaseCatalog;
use crate::core::updater::{MirrorUpdater, UpdaterSettings};
use crate::registry::BackendRegistry;
use crate::registry::client::ProbeClient;
use crate::utils::progress::ProgressTracker;
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Flags shared by every action, layered over the config file
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub max_mirrors: Option<usize>,
    pub concurrency: Option<usize>,
    pub mirror_file: Option<PathBuf>,
}

impl GlobalOptions {
    pub async fn load_config(&self) -> Result<AptPilotConfig> {
        let mut config = AptPilotConfig::load_or_default(self.config.as_deref()).await?;
        let updater = &mut config.updater;
        updater.blacklist.extend(self.exclude.iter().cloned());
        if let Some(max_mirrors) = self.max_mirrors {
            updater.max_mirrors = max_mirrors;
        }
        if let Some(concurrency) = self.concurrency {
            updater.concurrency = concurrency;
        }
        if let Some(mirror_file) = &self.mirror_file {
            updater.mirror_file = Some(mirror_file.clone());
        }
        Ok(config)
    }
}

pub(crate) fn probe_client(config: &AptPilotConfig) -> Result<ProbeClient> {
    Ok(ProbeClient::http()?.with_timeout(Duration::from_secs(config.updater.timeout_secs)))
}

/// Updater session for the local system
pub(crate) async fn local_updater(config: &AptPilotConfig) -> Result<MirrorUpdater> {
    let catalog = ReleaseCatalog::discover().await?;
    let updater = MirrorUpdater::detect(
        Arc::new(LocalContext),
        &BackendRegistry::with_defaults(),
        &catalog,
        probe_client(config)?,
        UpdaterSettings::from(&config.updater),
    )
    .await?;
    Ok(updater.with_progress(ProgressTracker::new()))
}
