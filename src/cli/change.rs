use crate::cli::{GlobalOptions, local_updater};
use crate::{AptPilotError, Result};
use colored::Colorize;

const MIRROR_SCHEMES: &[&str] = &["http://", "https://", "ftp://", "mirror://", "mirror+file:/"];

/// Change the main mirror to `mirror`, or to the best available mirror
pub async fn execute(options: &GlobalOptions, mirror: Option<String>, update: bool) -> Result<()> {
    if let Some(mirror) = &mirror {
        validate_mirror_url(mirror)?;
    }

    let config = options.load_config().await?;
    let mut updater = local_updater(&config).await?;
    updater
        .change_mirror(mirror.as_deref(), update, config.updater.max_attempts)
        .await?;

    println!("{} {}", "Now using".green(), updater.current_mirror().await?.bold());
    Ok(())
}

fn validate_mirror_url(mirror: &str) -> Result<()> {
    let mirror = mirror.trim();
    if MIRROR_SCHEMES.iter().any(|scheme| mirror.starts_with(scheme)) {
        Ok(())
    } else {
        Err(AptPilotError::InvalidMirrorUrl(mirror.to_string()))
    }
}
