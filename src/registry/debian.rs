//! Debian mirror discovery and archive layout

use super::client::{FetchOptions, ProbeClient};
use super::geo::{self, MIN_COUNTRY_MIRRORS};
use super::{MirrorBackend, extract_links, html_tables, html_text, table_rows, unique_mirror_urls};
use crate::core::candidate::{CandidateMirror, mirrors_are_equal, normalize_mirror_url};
use crate::core::releases::DistributorId;
use crate::{AptPilotError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::{Duration, Instant};
use tracing::info;

/// HTML page listing the Debian mirrors
pub const MIRRORS_URL: &str = "https://www.debian.org/mirror/list";
pub const SECURITY_URL: &str = "http://security.debian.org/debian-security";
/// Older sources lists point at the host root instead of `debian-security`
const SECURITY_HOST_URL: &str = "http://security.debian.org/";
pub const OLD_RELEASES_URL: &str = "http://archive.debian.org/debian-archive/debian/";
pub const BASE_URL: &str = "http://ftp.debian.org/debian";

const DEFAULT_SUITES: &[&str] = &["release", "security", "updates"];
const VALID_SUITES: &[&str] = &["release", "security", "updates", "backports", "proposed-updates"];
const VALID_COMPONENTS: &[&str] = &["main", "contrib", "non-free"];

/// Releases whose security suite is still named `<codename>/updates`
const OLD_SECURITY_LAYOUT: &[&str] = &["squeeze", "wheezy", "jessie", "stretch", "buster"];

/// Architectures supported by the Debian LTS team
const LTS_ARCHITECTURES: &[&str] = &["i386", "amd64", "armel", "armhf"];

/// End of Debian LTS support, which the archive honours before adopting a release
const LTS_RELEASES: &[(&str, (i32, u32, u32))] = &[
    ("jessie", (2020, 6, 30)),
    ("stretch", (2022, 6, 30)),
    ("buster", (2024, 6, 30)),
    ("bullseye", (2026, 8, 31)),
    ("bookworm", (2028, 6, 30)),
];

pub struct DebianBackend;

/// Mirrors listed under `country` in the by-country table: the rows with a
/// link that follow the row naming the country
pub(crate) fn country_mirrors(table: &str, country: &str) -> Vec<String> {
    let mut in_country = false;
    let mut urls = Vec::new();
    for row in table_rows(table) {
        if in_country {
            match extract_links(row).into_iter().next() {
                Some(url) => urls.push(url),
                None => break,
            }
        } else if html_text(row).eq_ignore_ascii_case(country) {
            in_country = true;
        }
    }
    urls
}

impl DebianBackend {
    fn uses_old_security_layout(codename: &str) -> bool {
        OLD_SECURITY_LAYOUT.contains(&codename)
    }

    /// Debian LTS end date for `codename`, if it has one
    pub fn lts_eol_date(codename: &str) -> Option<NaiveDate> {
        LTS_RELEASES
            .iter()
            .find(|(name, _)| *name == codename)
            .and_then(|(_, (y, m, d))| NaiveDate::from_ymd_opt(*y, *m, *d))
    }
}

#[async_trait]
impl MirrorBackend for DebianBackend {
    fn distributor(&self) -> DistributorId {
        DistributorId::Debian
    }

    async fn discover_mirrors(&self, client: &ProbeClient) -> Result<Vec<CandidateMirror>> {
        let started = Instant::now();
        info!("Discovering Debian mirrors at {} ..", MIRRORS_URL);
        let country = geo::locate_country(client).await;

        let options = FetchOptions {
            timeout: Duration::from_secs(20),
            retry: true,
            ..FetchOptions::default()
        };
        let page = client.fetch(MIRRORS_URL, options).await?;
        let html = String::from_utf8_lossy(&page);

        let tables = html_tables(&html);
        let Some(primary) = tables.first() else {
            return Err(AptPilotError::Discovery(format!(
                "Failed to locate <table> element in Debian mirror page! ({})",
                MIRRORS_URL
            )));
        };

        let mut urls = match (&country, tables.get(1)) {
            (Some(country), Some(by_country)) => country_mirrors(by_country, country),
            _ => Vec::new(),
        };
        if urls.len() < MIN_COUNTRY_MIRRORS {
            if let Some(country) = &country {
                info!("Too few Debian mirrors found in {}, adding primary mirrors", country);
            }
            urls.extend(
                extract_links(primary)
                    .into_iter()
                    .filter(|href| href.trim_end_matches('/').ends_with("/debian")),
            );
        }

        let mirrors: Vec<CandidateMirror> = unique_mirror_urls(urls).iter().map(|url| CandidateMirror::new(url)).collect();
        if mirrors.is_empty() {
            return Err(AptPilotError::Discovery(format!(
                "Failed to discover any Debian mirrors! (using {})",
                MIRRORS_URL
            )));
        }
        info!(
            "Discovered {} Debian mirrors in {:.2}s",
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

    fn is_security_mirror(&self, mirror_url: &str) -> bool {
        let mirror = format!("{}/", normalize_mirror_url(mirror_url));
        mirror.starts_with(SECURITY_HOST_URL)
    }

    fn old_releases_url(&self) -> Option<&'static str> {
        Some(OLD_RELEASES_URL)
    }

    fn release_probe_url(&self, mirror_url: &str, codename: &str) -> String {
        let mirror = mirror_url.trim_end_matches('/');
        let suite = if mirrors_are_equal(mirror_url, SECURITY_URL) {
            self.suite_name(codename, "security")
        } else {
            self.suite_name(codename, "updates")
        };
        format!("{}/dists/{}/Release", mirror, suite)
    }

    fn eol_override(&self, codename: &str, architecture: &str) -> Option<NaiveDate> {
        let supported = LTS_ARCHITECTURES.contains(&architecture)
            || (architecture == "arm64" && !matches!(codename, "jessie" | "stretch"));
        if supported { Self::lts_eol_date(codename) } else { None }
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

    fn suite_name(&self, codename: &str, suite: &str) -> String {
        match suite {
            "release" => codename.to_string(),
            "security" if Self::uses_old_security_layout(codename) => format!("{}/updates", codename),
            other => format!("{}-{}", codename, other),
        }
    }
}
