use crate::core::context::{ChrootContext, SystemContext};
use crate::core::releases::DistributorId;
use crate::core::updater::MirrorUpdater;
use crate::{AptPilotError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

impl MirrorUpdater {
    /// Bootstrap the session's release into `directory` with debootstrap
    /// and continue inside the new chroot.
    ///
    /// A non-empty `directory` is assumed to hold the chroot already. On the
    /// first run the chroot gets a generated sources list and fresh package
    /// lists.
    pub async fn create_chroot(&mut self, directory: &Path, arch: Option<&str>) -> Result<()> {
        if self.release().distributor_id == DistributorId::LinuxMint {
            return Err(AptPilotError::Chroot(
                "Creating a Linux Mint chroot makes no sense, pick an Ubuntu or Debian codename instead".to_string(),
            ));
        }
        let location = directory.to_string_lossy().into_owned();

        debug!("Checking if chroot already exists ({}) ..", location);
        let first_run = !self.context().exists(&location).await || self.context().list_dir(&location).await?.is_empty();
        if first_run {
            self.bootstrap(&location, arch).await?;
        } else {
            info!("The chroot already exists, skipping initialization.");
        }

        self.switch_context(Arc::new(ChrootContext::new(directory)));
        self.use_current_mirror = true;

        if first_run {
            let sources_list = self.generate_sources_list().await?;
            debug!("Generated sources list for chroot:\n{}", sources_list);
            self.run_checked("apt-get", &["clean"]).await?;
            self.install_sources_list(&sources_list).await?;
            let max_attempts = crate::constants::UPDATE_ATTEMPTS;
            self.smart_update(max_attempts, true).await?;
        }
        Ok(())
    }

    async fn bootstrap(&mut self, location: &str, arch: Option<&str>) -> Result<()> {
        let keyring = self.release().keyring_file()?;

        if !self.run_checked_quiet("which", &["debootstrap"]).await {
            info!("Installing `debootstrap' program ..");
            self.run_checked("apt-get", &["install", "--yes", "debootstrap"]).await?;
        }
        if !self.context().exists(keyring).await {
            let package = match self.release().distributor_id {
                DistributorId::Debian => "debian-archive-keyring",
                _ => "ubuntu-keyring",
            };
            info!("Installing {} for {} ..", package, keyring);
            self.run_checked("apt-get", &["install", "--yes", package]).await?;
        }

        let mirror = self.best_mirror().await?;
        let started = Instant::now();
        info!("Creating {} chroot in {} ..", self.release(), location);

        let mut args: Vec<String> = Vec::new();
        if let Some(arch) = arch {
            args.push(format!("--arch={}", arch));
        }
        args.push(format!("--keyring={}", keyring));
        args.push(self.codename().to_string());
        args.push(location.to_string());
        args.push(mirror);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked("debootstrap", &args).await?;

        info!(
            "Took {:.2}s to create {} chroot.",
            started.elapsed().as_secs_f64(),
            self.release()
        );
        Ok(())
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = self.context().run(program, args).await?;
        if output.success {
            Ok(())
        } else {
            Err(AptPilotError::Chroot(format!(
                "{} {} failed:\n{}",
                program,
                args.join(" "),
                output.output.trim()
            )))
        }
    }

    async fn run_checked_quiet(&self, program: &str, args: &[&str]) -> bool {
        self.context()
            .run(program, args)
            .await
            .is_ok_and(|output| output.success)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::releases::ReleaseCatalog;
    use crate::core::updater::{MirrorUpdater, UpdaterSettings};
    use crate::testing::{FakeBackend, FakeContext, FakeTransport, fake_client};
    use crate::AptPilotError;
    use chrono::NaiveDate;
    use std::path::Path;
    use std::sync::Arc;

    fn updater(context: &Arc<FakeContext>, series: &str, backend: FakeBackend) -> MirrorUpdater {
        let transport = Arc::new(FakeTransport::new());
        let release = ReleaseCatalog::bundled().unwrap().lookup(series).unwrap().clone();
        MirrorUpdater::new(
            context.clone(),
            Arc::new(backend),
            fake_client(&transport),
            release,
            "amd64".to_string(),
            UpdaterSettings::default(),
        )
        .unwrap()
        .with_today(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
    }

    #[tokio::test]
    async fn test_existing_chroot_is_not_bootstrapped_again() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        // The local side is a fake, so existence is checked there
        let context = Arc::new(FakeContext::new().with_file(&format!("{}/marker", dir.path().display()), ""));
        let mut updater = updater(&context, "jammy", FakeBackend::new(&[]));

        updater.create_chroot(dir.path(), None).await.unwrap();

        assert_eq!(context.count_commands("debootstrap"), 0);
        assert!(updater.context().describe().starts_with("chroot "));
    }

    #[tokio::test]
    async fn test_linux_mint_chroot_is_refused() {
        let context = Arc::new(FakeContext::new());
        let mut updater = updater(&context, "wilma", FakeBackend::new(&[]));

        let err = updater.create_chroot(Path::new("/srv/chroot"), None).await.unwrap_err();
        assert!(matches!(err, AptPilotError::Chroot(_)));
        assert!(context.commands().is_empty());
    }
}
