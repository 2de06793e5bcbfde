//! The mirror updater session
//!
//! Everything derived from the network or the sources list is computed
//! lazily and cached on the session. Switching mirrors or changing the
//! blacklist drops every cached value that depends on it.

use crate::core::candidate::{CandidateMirror, mirrors_are_equal, normalize_mirror_url, sort_best_first};
use crate::core::config::UpdaterConfig;
use crate::core::context::{CommandOutput, SystemContext, detect_architecture};
use crate::core::eol::{EolQuery, resolve_release_eol};
use crate::core::ranking::{RankedMirrors, RankingOptions, rank_mirrors};
use crate::core::releases::{Release, ReleaseCatalog};
use crate::core::sources_list::{SourcesList, install_sources_list, main_sources_list_path};
use crate::core::validator::{MirrorStatus, MirrorValidator};
use crate::registry::client::ProbeClient;
use crate::registry::{BackendRegistry, MirrorBackend, SourcesListRequest};
use crate::utils::progress::ProgressTracker;
use crate::{AptPilotError, Result};
use chrono::NaiveDate;
use glob::Pattern;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Directory holding apt's downloaded package lists
pub const PACKAGE_LISTS_DIRECTORY: &str = "/var/lib/apt/lists";

/// Tunables of one updater session
#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterSettings {
    pub concurrency: usize,
    /// Upper bound on ranked mirrors, 0 means unlimited
    pub max_mirrors: usize,
    pub blacklist: Vec<String>,
    pub mirror_file: Option<PathBuf>,
    /// Use this sources list instead of detecting it
    pub sources_list: Option<String>,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self::from(&UpdaterConfig::default())
    }
}

impl From<&UpdaterConfig> for UpdaterSettings {
    fn from(config: &UpdaterConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            max_mirrors: config.max_mirrors,
            blacklist: config.blacklist.clone(),
            mirror_file: config.mirror_file.clone(),
            sources_list: config.sources_list.clone(),
        }
    }
}

pub struct MirrorUpdater {
    pub(crate) context: Arc<dyn SystemContext>,
    backend: Arc<dyn MirrorBackend>,
    client: ProbeClient,
    release: Release,
    architecture: String,
    settings: UpdaterSettings,
    blacklist: Vec<Pattern>,
    validator: MirrorValidator,
    progress: ProgressTracker,
    today: NaiveDate,
    /// Whether the context's configured mirror serves `release`
    pub(crate) use_current_mirror: bool,

    sources_list_path: Option<String>,
    current_mirror: Option<String>,
    release_is_eol: Option<bool>,
    available_mirrors: Option<Vec<CandidateMirror>>,
    ranked_mirrors: Option<RankedMirrors>,
    best_mirror: Option<String>,
    stable_mirror: Option<String>,
}

impl MirrorUpdater {
    pub fn new(
        context: Arc<dyn SystemContext>,
        backend: Arc<dyn MirrorBackend>,
        client: ProbeClient,
        release: Release,
        architecture: String,
        settings: UpdaterSettings,
    ) -> Result<Self> {
        let blacklist = settings
            .blacklist
            .iter()
            .map(|pattern| compile_pattern(pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            context,
            backend,
            client,
            release,
            architecture,
            settings,
            blacklist,
            validator: MirrorValidator::new(),
            progress: ProgressTracker::new(),
            today: chrono::Utc::now().date_naive(),
            use_current_mirror: true,
            sources_list_path: None,
            current_mirror: None,
            release_is_eol: None,
            available_mirrors: None,
            ranked_mirrors: None,
            best_mirror: None,
            stable_mirror: None,
        })
    }

    /// Session for the system behind `context`, with the release taken from
    /// its sources list
    pub async fn detect(
        context: Arc<dyn SystemContext>,
        registry: &BackendRegistry,
        catalog: &ReleaseCatalog,
        client: ProbeClient,
        settings: UpdaterSettings,
    ) -> Result<Self> {
        let path = match &settings.sources_list {
            Some(path) => path.clone(),
            None => main_sources_list_path(context.as_ref()).await.to_string(),
        };
        debug!("Parsing {} to find the release of {} ..", path, context.describe());
        let contents = context.read_file(&path).await?;
        let release = SourcesList::parse(&contents)
            .find_release(catalog)
            .map_err(|_| AptPilotError::CodenameUnknown(path.clone()))?
            .clone();
        let backend = registry.resolve(release.distributor_id)?;
        let architecture = detect_architecture(context.as_ref()).await;
        info!("Detected {} ({}) on {}", release, architecture, context.describe());

        let mut updater = Self::new(context, backend, client, release, architecture, settings)?;
        updater.sources_list_path = Some(path);
        Ok(updater)
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// Never consider the context's configured mirror, for sessions about a
    /// release other than the one the context runs
    pub fn without_current_mirror(mut self) -> Self {
        self.use_current_mirror = false;
        self
    }

    /// Evaluate EOL dates against `today` instead of the current date
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn release(&self) -> &Release {
        &self.release
    }

    pub fn codename(&self) -> &str {
        &self.release.series
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn backend(&self) -> &dyn MirrorBackend {
        self.backend.as_ref()
    }

    pub fn context(&self) -> &dyn SystemContext {
        self.context.as_ref()
    }

    pub fn blacklist(&self) -> &[Pattern] {
        &self.blacklist
    }

    pub fn old_releases_url(&self) -> Option<&'static str> {
        self.backend.old_releases_url()
    }

    pub fn security_url(&self) -> &'static str {
        self.backend.security_url()
    }

    pub async fn sources_list_path(&mut self) -> String {
        if let Some(path) = &self.sources_list_path {
            return path.clone();
        }
        let path = match &self.settings.sources_list {
            Some(path) => path.clone(),
            None => main_sources_list_path(self.context.as_ref()).await.to_string(),
        };
        self.sources_list_path = Some(path.clone());
        path
    }

    pub async fn read_sources_list(&mut self) -> Result<SourcesList> {
        let path = self.sources_list_path().await;
        let contents = self.context.read_file(&path).await?;
        Ok(SourcesList::parse(&contents))
    }

    /// URL of the main mirror in the sources list
    pub async fn current_mirror(&mut self) -> Result<String> {
        if let Some(mirror) = &self.current_mirror {
            return Ok(mirror.clone());
        }
        let path = self.sources_list_path().await;
        debug!("Parsing {} to find current mirror of {} ..", path, self.context.describe());
        let mirror = self
            .read_sources_list()
            .await
            .and_then(|list| list.find_current_mirror())
            .map_err(|_| AptPilotError::CurrentMirrorUnknown(path))?;
        self.current_mirror = Some(mirror.clone());
        Ok(mirror)
    }

    /// Whether the release is EOL and served by the old releases mirror.
    /// Decided once per session.
    pub async fn release_is_eol(&mut self) -> bool {
        if let Some(eol) = self.release_is_eol {
            return eol;
        }
        let eol = resolve_release_eol(
            EolQuery {
                client: &self.client,
                backend: self.backend.as_ref(),
                release: &self.release,
                architecture: &self.architecture,
                today: self.today,
            },
            &mut self.validator,
        )
        .await;
        self.release_is_eol = Some(eol);
        eol
    }

    pub async fn validate_mirror(&mut self, mirror_url: &str) -> MirrorStatus {
        self.validator
            .validate(&self.client, self.backend.as_ref(), mirror_url, &self.release.series)
            .await
    }

    pub fn is_blacklisted(&self, mirror_url: &str) -> bool {
        let normalized = normalize_mirror_url(mirror_url);
        let with_slash = format!("{}/", normalized);
        self.blacklist
            .iter()
            .any(|pattern| pattern.matches(&normalized) || pattern.matches(&with_slash))
    }

    /// Mirrors listed in the custom mirror file, if one is configured
    pub async fn read_custom_mirror_file(&self) -> Result<Vec<CandidateMirror>> {
        let Some(path) = &self.settings.mirror_file else {
            return Ok(Vec::new());
        };
        info!("Reading custom mirrors from {}", path.display());
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            AptPilotError::Config(format!("Failed to read mirror file {}: {}", path.display(), e))
        })?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| ["http://", "https://", "ftp://"].iter().any(|scheme| line.starts_with(scheme)))
            .map(CandidateMirror::new)
            .collect())
    }

    /// Candidates to rank: custom mirrors, the base mirror, discovered
    /// mirrors and the current mirror, minus the blacklist, best first.
    /// Discovery is skipped entirely for EOL releases.
    pub async fn available_mirrors(&mut self) -> Result<Vec<CandidateMirror>> {
        if let Some(mirrors) = &self.available_mirrors {
            return Ok(mirrors.clone());
        }

        let mut mirrors: Vec<CandidateMirror> = Vec::new();
        if self.release_is_eol().await {
            warn!("Skipping mirror discovery because {} is EOL.", self.release);
        } else {
            for mirror in self.read_custom_mirror_file().await? {
                if self.is_blacklisted(mirror.mirror_url()) {
                    warn!("Ignoring blacklisted mirror {}.", mirror.mirror_url());
                } else {
                    info!("Adding custom mirror {}", mirror.mirror_url());
                    add_unique(&mut mirrors, mirror);
                }
            }
            // Always probed since it is the staleness reference
            let base = self.backend.base_mirror();
            debug!("Adding base mirror {}", base);
            add_unique(&mut mirrors, CandidateMirror::new(base));

            for mirror in self.backend.discover_mirrors(&self.client).await? {
                if self.is_blacklisted(mirror.mirror_url()) {
                    warn!("Ignoring blacklisted mirror {}.", mirror.mirror_url());
                } else {
                    add_unique(&mut mirrors, mirror);
                }
            }
        }

        if self.use_current_mirror {
            match self.current_mirror().await {
                Ok(current) if self.is_blacklisted(&current) => {
                    debug!("Not adding blacklisted current mirror {}", current);
                }
                Ok(current) => add_unique(&mut mirrors, CandidateMirror::new(&current)),
                Err(e) => warn!("Failed to add current mirror to set of available mirrors! ({})", e),
            }
        }

        sort_best_first(&mut mirrors);
        self.available_mirrors = Some(mirrors.clone());
        Ok(mirrors)
    }

    /// Probe and rank the available mirrors. Blacklisted mirrors that were
    /// only probed as the staleness reference are dropped from the result.
    pub async fn ranked_mirrors(&mut self) -> Result<RankedMirrors> {
        if let Some(ranked) = &self.ranked_mirrors {
            return Ok(ranked.clone());
        }
        let candidates = self.available_mirrors().await?;
        let total = candidates.len();
        let mut ranked = rank_mirrors(
            &self.client,
            self.backend.as_ref(),
            &self.release.series,
            candidates,
            RankingOptions {
                max_count: self.settings.max_mirrors,
                concurrency: self.settings.concurrency,
            },
            &self.progress,
        )
        .await?;

        ranked.mirrors.retain(|m| !self.is_blacklisted(m.mirror_url()));
        if ranked.available().next().is_none() {
            return Err(AptPilotError::AllMirrorsUnavailable(total));
        }
        self.ranked_mirrors = Some(ranked.clone());
        Ok(ranked)
    }

    /// URL of the best mirror; the old releases mirror for EOL releases
    pub async fn best_mirror(&mut self) -> Result<String> {
        if let Some(best) = &self.best_mirror {
            return Ok(best.clone());
        }
        let best = match self.eol_fallback().await {
            Some(old_releases) => {
                debug!("{} is EOL, using {}", self.release, old_releases);
                old_releases.to_string()
            }
            None => {
                let ranked = self.ranked_mirrors().await?;
                ranked
                    .best()
                    .map(|m| m.mirror_url().to_string())
                    .ok_or(AptPilotError::AllMirrorsUnavailable(0))?
            }
        };
        self.best_mirror = Some(best.clone());
        Ok(best)
    }

    /// The current mirror unless it can't be determined, otherwise the best
    /// one. Sticking with the current mirror avoids apt re-downloading every
    /// package list.
    pub async fn stable_mirror(&mut self) -> Result<String> {
        if let Some(stable) = &self.stable_mirror {
            return Ok(stable.clone());
        }
        let stable = if let Some(old_releases) = self.eol_fallback().await {
            old_releases.to_string()
        } else if let Some(current) = self.usable_current_mirror().await {
            current
        } else {
            debug!("Failed to determine current mirror, selecting best mirror instead ..");
            self.best_mirror().await?
        };
        self.stable_mirror = Some(stable.clone());
        Ok(stable)
    }

    async fn usable_current_mirror(&mut self) -> Option<String> {
        if !self.use_current_mirror {
            return None;
        }
        let current = self.current_mirror().await.ok()?;
        (!self.is_blacklisted(&current)).then_some(current)
    }

    async fn eol_fallback(&mut self) -> Option<&'static str> {
        if self.release_is_eol().await {
            self.backend.old_releases_url()
        } else {
            None
        }
    }

    /// Exclude mirrors matching a glob pattern from now on
    pub fn ignore_mirror(&mut self, pattern: &str) -> Result<()> {
        info!("Adding pattern to mirror discovery blacklist: {}", pattern);
        self.blacklist.push(compile_pattern(pattern)?);
        self.invalidate_mirrors();
        Ok(())
    }

    /// Point the sources list at `new_mirror` (the best mirror when `None`)
    /// and optionally refresh the package lists without switching again
    pub async fn change_mirror(&mut self, new_mirror: Option<&str>, update: bool, max_attempts: u32) -> Result<()> {
        let started = Instant::now();
        let new_mirror = match new_mirror {
            Some(mirror) => {
                info!("Changing mirror of {} to {} ..", self.context.describe(), mirror);
                mirror.to_string()
            }
            None => {
                info!("Changing mirror of {} to best available mirror ..", self.context.describe());
                let best = self.best_mirror().await?;
                info!("Selected mirror: {}", best);
                best
            }
        };
        self.switch_mirror(&new_mirror).await?;
        if update {
            self.smart_update(max_attempts, false).await?;
        }
        info!(
            "Finished changing mirror of {} in {:.2}s.",
            self.context.describe(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Rewrite the sources list to use `new_mirror` and clear the package
    /// lists. For EOL releases the security mirror is replaced as well.
    pub(crate) async fn switch_mirror(&mut self, new_mirror: &str) -> Result<()> {
        let current = self.current_mirror().await?;
        let replace_security = self.release_is_eol().await;
        if replace_security {
            debug!("Replacing {} URLs as well ..", self.security_url());
        }

        let mut sources_list = self.read_sources_list().await?;
        let backend = Arc::clone(&self.backend);
        let replaced = sources_list.replace_matching(
            |url| mirrors_are_equal(url, &current) || (replace_security && backend.is_security_mirror(url)),
            new_mirror,
        );
        debug!("Rewrote {} sources list entries", replaced);
        self.install_sources_list(&sources_list.render()).await?;
        self.clear_package_lists().await
    }

    pub async fn install_sources_list(&mut self, contents: &str) -> Result<()> {
        let path = self.sources_list_path().await;
        install_sources_list(self.context.as_ref(), &path, contents).await?;
        self.current_mirror = None;
        self.invalidate_mirrors();
        Ok(())
    }

    /// Sources list for the stable mirror with the backend's default suites
    pub async fn generate_sources_list(&mut self) -> Result<String> {
        let mirror_url = self.stable_mirror().await?;
        self.backend.generate_sources_list(&SourcesListRequest {
            mirror_url,
            codename: self.release.series.clone(),
            ..SourcesListRequest::default()
        })
    }

    /// Remove the downloaded package lists, keeping apt's lock file
    pub async fn clear_package_lists(&self) -> Result<()> {
        let started = Instant::now();
        info!("Clearing package list cache of {} ..", self.context.describe());
        let output = self
            .context
            .run(
                "find",
                &[PACKAGE_LISTS_DIRECTORY, "-type", "f", "!", "-name", "lock", "-delete"],
            )
            .await?;
        if !output.success {
            return Err(AptPilotError::Command(format!(
                "Failed to clear {}: {}",
                PACKAGE_LISTS_DIRECTORY,
                output.output.trim()
            )));
        }
        info!(
            "Successfully cleared package list cache of {} in {:.2}s.",
            self.context.describe(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    pub(crate) async fn run_update(&self) -> Result<CommandOutput> {
        info!("Updating package lists of {} ..", self.context.describe());
        self.context.run("apt-get", &["update"]).await
    }

    /// Run `apt-get update` once, without any error handling
    pub async fn dumb_update(&self) -> Result<()> {
        let started = Instant::now();
        let output = self.run_update().await?;
        if !output.success {
            return Err(AptPilotError::Command(format!("apt-get update failed:\n{}", output.output.trim())));
        }
        info!(
            "Finished updating package lists of {} in {:.2}s.",
            self.context.describe(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Run in a different system from now on
    pub(crate) fn switch_context(&mut self, context: Arc<dyn SystemContext>) {
        self.context = context;
        self.sources_list_path = None;
        self.current_mirror = None;
        self.invalidate_mirrors();
    }

    fn invalidate_mirrors(&mut self) {
        self.available_mirrors = None;
        self.ranked_mirrors = None;
        self.best_mirror = None;
        self.stable_mirror = None;
    }
}

fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| AptPilotError::Config(format!("Invalid mirror pattern {:?}: {}", pattern, e)))
}

fn add_unique(mirrors: &mut Vec<CandidateMirror>, mirror: CandidateMirror) {
    if !mirrors.iter().any(|m| mirrors_are_equal(m.mirror_url(), mirror.mirror_url())) {
        mirrors.push(mirror);
    }
}
