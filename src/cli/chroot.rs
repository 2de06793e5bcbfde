use crate::cli::{GlobalOptions, local_updater, probe_client};
use crate::core::context::{LocalContext, detect_architecture};
use crate::core::releases::ReleaseCatalog;
use crate::core::updater::{MirrorUpdater, UpdaterSettings};
use crate::registry::BackendRegistry;
use crate::utils::progress::ProgressTracker;
use crate::Result;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

/// Create (or reuse) a chroot of `codename`, the host's release by default
pub async fn execute(
    options: &GlobalOptions,
    directory: &Path,
    codename: Option<String>,
    arch: Option<String>,
) -> Result<()> {
    let config = options.load_config().await?;

    let mut updater = match codename {
        Some(codename) => {
            let catalog = ReleaseCatalog::discover().await?;
            let release = catalog.lookup(&codename)?.clone();
            let backend = BackendRegistry::with_defaults().resolve(release.distributor_id)?;
            let context = Arc::new(LocalContext);
            let architecture = match &arch {
                Some(arch) => arch.clone(),
                None => detect_architecture(context.as_ref()).await,
            };
            MirrorUpdater::new(
                context,
                backend,
                probe_client(&config)?,
                release,
                architecture,
                UpdaterSettings::from(&config.updater),
            )?
            .without_current_mirror()
            .with_progress(ProgressTracker::new())
        }
        None => local_updater(&config).await?,
    };

    updater.create_chroot(directory, arch.as_deref()).await?;
    println!(
        "{} {} chroot ready in {}",
        "✓".green(),
        updater.release(),
        directory.display().to_string().bold()
    );
    Ok(())
}
