//! Ubuntu mirror discovery and archive layout

use super::client::{FetchOptions, ProbeClient};
use super::{MirrorBackend, extract_links, unique_mirror_urls};
use crate::core::candidate::CandidateMirror;
use crate::core::releases::DistributorId;
use crate::{AptPilotError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Launchpad's HTML listing of official archive mirrors
pub const MIRRORS_URL: &str = "https://launchpad.net/ubuntu/+archivemirrors";
/// Plain text list of geographically suitable mirrors
pub const MIRROR_SELECTION_URL: &str = "http://mirrors.ubuntu.com/mirrors.txt";
pub const OLD_RELEASES_URL: &str = "http://old-releases.ubuntu.com/ubuntu/";
pub const SECURITY_URL: &str = "http://security.ubuntu.com/ubuntu";
pub const BASE_URL: &str = "http://archive.ubuntu.com/ubuntu";

const DEFAULT_SUITES: &[&str] = &["release", "updates", "backports", "security"];
const VALID_SUITES: &[&str] = &["release", "security", "updates", "backports", "proposed"];
const VALID_COMPONENTS: &[&str] = &["main", "restricted", "universe", "multiverse"];

/// Launchpad mirror status CSS suffixes and the lag they stand for
const MIRROR_STATUSES: &[(&str, Option<i64>)] = &[
    ("UP", Some(0)),
    ("ONEHOURBEHIND", Some(60 * 60)),
    ("TWOHOURSBEHIND", Some(60 * 60 * 2)),
    ("FOURHOURSBEHIND", Some(60 * 60 * 4)),
    ("SIXHOURSBEHIND", Some(60 * 60 * 6)),
    ("ONEDAYBEHIND", Some(60 * 60 * 24)),
    ("TWODAYSBEHIND", Some(60 * 60 * 24 * 2)),
    ("ONEWEEKBEHIND", Some(60 * 60 * 24 * 7)),
    ("UNKNOWN", None),
];

pub struct UbuntuBackend;

impl UbuntuBackend {
    async fn discover_mirror_selection(&self, client: &ProbeClient) -> Vec<CandidateMirror> {
        info!("Identifying fast Ubuntu mirrors using {} ..", MIRROR_SELECTION_URL);
        let options = FetchOptions {
            timeout: Duration::from_secs(3),
            retry: true,
            max_attempts: 5,
        };
        match client.fetch(MIRROR_SELECTION_URL, options).await {
            Ok(body) => {
                let text = String::from_utf8_lossy(&body);
                let mirrors: Vec<CandidateMirror> =
                    unique_mirror_urls(text.lines().map(|line| line.trim().to_string()))
                        .iter()
                        .filter(|url| !url.starts_with("ftp://"))
                        .map(|url| CandidateMirror::new(url))
                        .collect();
                debug!("Found {} fast Ubuntu mirrors", mirrors.len());
                mirrors
            }
            Err(e) => {
                warn!("Failed to fetch {} ({})", MIRROR_SELECTION_URL, e);
                Vec::new()
            }
        }
    }

    async fn discover_launchpad_mirrors(&self, client: &ProbeClient) -> Result<Vec<CandidateMirror>> {
        info!("Discovering Ubuntu mirrors at {} ..", MIRRORS_URL);
        let options = FetchOptions {
            timeout: Duration::from_secs(70),
            retry: true,
            ..FetchOptions::default()
        };
        let page = client.fetch(MIRRORS_URL, options).await?;
        Ok(parse_launchpad_mirrors(&String::from_utf8_lossy(&page)))
    }
}

/// Extract mirrors and their advertised lag from Launchpad's mirror table
pub(crate) fn parse_launchpad_mirrors(html: &str) -> Vec<CandidateMirror> {
    let Ok(status_pattern) = Regex::new(r"distromirrorstatus([A-Z]+)") else {
        return Vec::new();
    };

    let mut seen = rustc_hash::FxHashSet::default();
    let mut mirrors = Vec::new();
    for row in html.split("<tr").skip(1) {
        let last_updated = status_pattern
            .captures(row)
            .and_then(|caps| caps.get(1))
            .and_then(|status| {
                MIRROR_STATUSES
                    .iter()
                    .find(|(name, _)| *name == status.as_str())
                    .and_then(|(_, lag)| *lag)
            });
        for url in extract_links(row) {
            let is_mirror = (url.starts_with("http://") || url.starts_with("https://"))
                && !url.contains("launchpad.net");
            if is_mirror && seen.insert(crate::core::candidate::normalize_mirror_url(&url)) {
                mirrors.push(CandidateMirror::new(&url).with_last_updated(last_updated));
            }
        }
    }
    mirrors
}

#[async_trait]
impl MirrorBackend for UbuntuBackend {
    fn distributor(&self) -> DistributorId {
        DistributorId::Ubuntu
    }

    async fn discover_mirrors(&self, client: &ProbeClient) -> Result<Vec<CandidateMirror>> {
        let started = Instant::now();
        let mut mirrors = self.discover_mirror_selection(client).await;

        if mirrors.is_empty() {
            warn!("Failed to discover any Ubuntu mirrors! (using {})", MIRROR_SELECTION_URL);
            info!("Trying to use {} as fallback", MIRRORS_URL);
            mirrors = self.discover_launchpad_mirrors(client).await?;
        } else if mirrors.len() < 2 {
            warn!("Too few mirrors, trying to use {} to find more", MIRRORS_URL);
            match self.discover_launchpad_mirrors(client).await {
                Ok(extra) => {
                    for mirror in extra {
                        if !mirrors.contains(&mirror) {
                            mirrors.push(mirror);
                        }
                    }
                }
                Err(e) => warn!("Failed to discover more Ubuntu mirrors ({})", e),
            }
        }

        if mirrors.is_empty() {
            return Err(AptPilotError::Discovery(format!(
                "Failed to discover any Ubuntu mirrors! (using {})",
                MIRRORS_URL
            )));
        }
        info!(
            "Discovered {} Ubuntu mirrors in {:.2}s",
            mirrors.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(mirrors)
    }

    fn base_mirror(&self) -> &'static str {
        BASE_URL
    }

    fn security_url(&self) -> &'static str {
        SECURITY_URL
    }

    fn old_releases_url(&self) -> Option<&'static str> {
        Some(OLD_RELEASES_URL)
    }

    fn release_probe_url(&self, mirror_url: &str, codename: &str) -> String {
        format!("{}/dists/{}-security/Release", mirror_url.trim_end_matches('/'), codename)
    }

    fn default_suites(&self) -> &'static [&'static str] {
        DEFAULT_SUITES
    }

    fn valid_suites(&self) -> &'static [&'static str] {
        VALID_SUITES
    }

    fn valid_components(&self) -> &'static [&'static str] {
        VALID_COMPONENTS
    }
}
