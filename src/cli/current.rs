use crate::cli::{GlobalOptions, local_updater};
use crate::Result;

pub async fn execute(options: &GlobalOptions) -> Result<()> {
    let config = options.load_config().await?;
    let mut updater = local_updater(&config).await?;
    println!("{}", updater.current_mirror().await?);
    Ok(())
}
