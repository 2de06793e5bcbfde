use crate::cli::{GlobalOptions, local_updater};
use crate::Result;

/// Refresh the package lists, repairing the mirror selection when needed
pub async fn execute(options: &GlobalOptions, max_attempts: Option<u32>, switch_mirrors: bool) -> Result<()> {
    let config = options.load_config().await?;
    let max_attempts = max_attempts.unwrap_or(config.updater.max_attempts);
    let mut updater = local_updater(&config).await?;
    updater.smart_update(max_attempts, switch_mirrors).await
}
