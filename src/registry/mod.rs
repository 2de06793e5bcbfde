//! Distribution backends and the HTTP probe layer they run on
//!
//! Each supported distributor gets one [`MirrorBackend`]. The
//! [`BackendRegistry`] maps a [`DistributorId`] to its backend at startup.

pub mod client;
pub mod debian;
pub mod geo;
pub mod linuxmint;
pub mod ubuntu;

use crate::core::candidate::{CandidateMirror, mirrors_are_equal};
use crate::core::releases::DistributorId;
use crate::{AptPilotError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use client::ProbeClient;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// What `generate_sources_list` should emit
#[derive(Debug, Clone, Default)]
pub struct SourcesListRequest {
    pub mirror_url: String,
    pub codename: String,
    /// `None` selects the backend's default suites
    pub suites: Option<Vec<String>>,
    /// `None` selects every valid component
    pub components: Option<Vec<String>>,
    pub enable_sources: bool,
}

/// Per-distribution knowledge: where mirrors are listed, how to probe them
/// and what a sources list looks like.
#[async_trait]
pub trait MirrorBackend: Send + Sync {
    fn distributor(&self) -> DistributorId;

    /// Find candidate mirrors. Fails when none could be found.
    async fn discover_mirrors(&self, client: &ProbeClient) -> Result<Vec<CandidateMirror>>;

    /// The official archive, used as the staleness reference
    fn base_mirror(&self) -> &'static str;

    fn security_url(&self) -> &'static str;

    /// Whether a sources list entry for `mirror_url` points at the security
    /// mirror
    fn is_security_mirror(&self, mirror_url: &str) -> bool {
        mirrors_are_equal(mirror_url, self.security_url())
    }

    /// Where retired releases live, if the distributor has such a place
    fn old_releases_url(&self) -> Option<&'static str>;

    /// URL of the small release-metadata file used to test `mirror_url`
    fn release_probe_url(&self, mirror_url: &str, codename: &str) -> String;

    /// Text that must appear in the release metadata for a mirror to count
    /// as available
    fn availability_marker(&self) -> &'static str {
        "Date:"
    }

    /// EOL date that takes precedence over the release catalog
    fn eol_override(&self, _codename: &str, _architecture: &str) -> Option<NaiveDate> {
        None
    }

    fn default_suites(&self) -> &'static [&'static str];

    fn valid_suites(&self) -> &'static [&'static str];

    fn valid_components(&self) -> &'static [&'static str];

    /// Name of `suite` in the archive for `codename`
    fn suite_name(&self, codename: &str, suite: &str) -> String {
        match suite {
            "release" => codename.to_string(),
            other => format!("{}-{}", codename, other),
        }
    }

    /// Render a complete sources list for `request`
    fn generate_sources_list(&self, request: &SourcesListRequest) -> Result<String> {
        let name = self.distributor().display_name();
        let suites: Vec<String> = match &request.suites {
            Some(suites) => suites.clone(),
            None => self.default_suites().iter().map(|s| s.to_string()).collect(),
        };
        let components: Vec<String> = match &request.components {
            Some(components) => components.clone(),
            None => self.valid_components().iter().map(|c| c.to_string()).collect(),
        };

        let invalid: Vec<&str> = suites
            .iter()
            .filter(|s| !self.valid_suites().contains(&s.as_str()))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(AptPilotError::Config(format!("Invalid {} suite(s) given! ({:?})", name, invalid)));
        }
        let invalid: Vec<&str> = components
            .iter()
            .filter(|c| !self.valid_components().contains(&c.as_str()))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(AptPilotError::Config(format!(
                "Invalid {} component(s) given! ({:?})",
                name, invalid
            )));
        }

        let archived = self
            .old_releases_url()
            .is_some_and(|old| mirrors_are_equal(&request.mirror_url, old));
        let directives: &[&str] = if request.enable_sources { &["deb", "deb-src"] } else { &["deb"] };

        let mut lines = Vec::with_capacity(suites.len() * directives.len());
        for suite in &suites {
            let mirror = if archived || suite != "security" {
                request.mirror_url.as_str()
            } else {
                self.security_url()
            };
            for directive in directives {
                lines.push(format!(
                    "{} {} {} {}",
                    directive,
                    mirror,
                    self.suite_name(&request.codename, suite),
                    components.join(" ")
                ));
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Lookup table from distributor to backend
pub struct BackendRegistry {
    backends: FxHashMap<DistributorId, Arc<dyn MirrorBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: FxHashMap::default(),
        }
    }

    /// Registry with the Debian, Ubuntu and Linux Mint backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(debian::DebianBackend));
        registry.register(Arc::new(ubuntu::UbuntuBackend));
        registry.register(Arc::new(linuxmint::LinuxMintBackend));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn MirrorBackend>) {
        self.backends.insert(backend.distributor(), backend);
    }

    pub fn resolve(&self, id: DistributorId) -> Result<Arc<dyn MirrorBackend>> {
        self.backends
            .get(&id)
            .cloned()
            .ok_or_else(|| AptPilotError::UnsupportedPlatform(id.display_name().to_string()))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// All `href` targets in an HTML document, in document order
pub(crate) fn extract_links(html: &str) -> Vec<String> {
    // Static pattern, cannot fail to compile
    let Ok(pattern) = Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#) else {
        return Vec::new();
    };
    pattern
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Every `<table>` element of an HTML document, in document order
pub(crate) fn html_tables(html: &str) -> Vec<&str> {
    let Ok(pattern) = Regex::new(r"(?is)<table\b.*?</table>") else {
        return Vec::new();
    };
    pattern.find_iter(html).map(|m| m.as_str()).collect()
}

/// Rows of an HTML table, closing tags optional
pub(crate) fn table_rows(table: &str) -> Vec<&str> {
    let Ok(pattern) = Regex::new(r"(?i)<tr\b") else {
        return Vec::new();
    };
    pattern
        .split(table)
        .skip(1)
        .map(|row| row.split_once('>').map_or(row, |(_, content)| content))
        .collect()
}

/// Text of every `<td>` cell in a table row
pub(crate) fn row_cells(row: &str) -> Vec<String> {
    let Ok(pattern) = Regex::new(r"(?i)<td\b") else {
        return Vec::new();
    };
    pattern
        .split(row)
        .skip(1)
        .map(|cell| html_text(cell.split_once('>').map_or(cell, |(_, content)| content)))
        .collect()
}

/// Text content of an HTML fragment, whitespace collapsed
pub(crate) fn html_text(fragment: &str) -> String {
    let Ok(tags) = Regex::new(r"<[^>]*>") else {
        return fragment.trim().to_string();
    };
    tags.replace_all(fragment, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep unique http(s)/ftp URLs, preserving first-seen order
pub(crate) fn unique_mirror_urls<I>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = rustc_hash::FxHashSet::default();
    urls.into_iter()
        .filter(|url| url.starts_with("http://") || url.starts_with("https://") || url.starts_with("ftp://"))
        .filter(|url| seen.insert(crate::core::candidate::normalize_mirror_url(url)))
        .collect()
}
