use crate::constants::LAST_UPDATED_DEFAULT;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use tracing::debug;
use url::Url;

/// Strip trailing slashes so mirror URLs compare with string equality
pub fn normalize_mirror_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

pub fn mirrors_are_equal(a: &str, b: &str) -> bool {
    normalize_mirror_url(a) == normalize_mirror_url(b)
}

/// Parse the `Date:` value of a Release file into a Unix timestamp
pub fn parse_release_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.timestamp());
    }
    let naive = value
        .strip_suffix(" UTC")
        .or_else(|| value.strip_suffix(" GMT"))
        .unwrap_or(value);
    NaiveDateTime::parse_from_str(naive, "%a, %d %b %Y %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// A mirror URL plus whatever probe results have been attached to it.
///
/// Identity is the normalized URL: two candidates for the same mirror are
/// equal and hash the same regardless of probe data.
#[derive(Debug, Clone)]
pub struct CandidateMirror {
    mirror_url: String,
    release_gpg_contents: Option<Bytes>,
    release_gpg_latency: Option<f64>,
    is_available: Option<bool>,
    is_updating: Option<bool>,
    last_updated: Option<i64>,
}

impl CandidateMirror {
    pub fn new(mirror_url: &str) -> Self {
        Self {
            mirror_url: normalize_mirror_url(mirror_url),
            release_gpg_contents: None,
            release_gpg_latency: None,
            is_available: None,
            is_updating: None,
            last_updated: None,
        }
    }

    /// Attach a staleness hint published by the discovery source
    pub fn with_last_updated(mut self, seconds: Option<i64>) -> Self {
        self.last_updated = seconds;
        self
    }

    pub fn mirror_url(&self) -> &str {
        &self.mirror_url
    }

    pub fn release_gpg_contents(&self) -> Option<&Bytes> {
        self.release_gpg_contents.as_ref()
    }

    pub fn release_gpg_latency(&self) -> Option<f64> {
        self.release_gpg_latency
    }

    /// Store the result of the release-metadata probe and decide availability.
    ///
    /// A mirror is available when the body contains `marker`. This catches
    /// broken web servers and squatted domains that answer 200 for any URL.
    pub fn record_release_probe(&mut self, contents: Option<Bytes>, latency: f64, marker: &str) {
        let available = match &contents {
            Some(body) if !body.is_empty() => {
                let found = contains(body, marker.as_bytes());
                if !found {
                    debug!("Missing {:?}, considering {} unavailable", marker, self.mirror_url);
                }
                found
            }
            _ => false,
        };
        self.release_gpg_contents = contents;
        self.release_gpg_latency = Some(latency);
        self.is_available = Some(available);
    }

    pub fn is_available(&self) -> bool {
        self.is_available.unwrap_or(false)
    }

    pub fn is_updating(&self) -> Option<bool> {
        self.is_updating
    }

    pub fn set_updating(&mut self, updating: bool) {
        self.is_updating = Some(updating);
    }

    /// Seconds this mirror lags behind the reference mirror
    pub fn last_updated(&self) -> Option<i64> {
        self.last_updated
    }

    pub fn set_last_updated(&mut self, seconds: i64) {
        self.last_updated = Some(seconds);
    }

    /// Timestamp of the `Date:` field in the fetched release metadata
    pub fn release_timestamp(&self) -> Option<i64> {
        let contents = self.release_gpg_contents.as_ref()?;
        let text = String::from_utf8_lossy(contents);
        text.lines()
            .find_map(|line| line.strip_prefix("Date:"))
            .and_then(parse_release_date)
    }

    /// Bytes per second achieved by the release-metadata probe
    pub fn bandwidth(&self) -> f64 {
        match (&self.release_gpg_contents, self.release_gpg_latency) {
            (Some(body), Some(latency)) if !body.is_empty() && latency > 0.0 => body.len() as f64 / latency,
            _ => 0.0,
        }
    }

    /// URL of the marker file a mirror publishes while it is being synced
    pub fn archive_update_in_progress_url(&self) -> Option<String> {
        let parsed = Url::parse(&self.mirror_url).ok()?;
        let host = parsed.host_str()?;
        let netloc = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Some(format!("{}/Archive-Update-in-Progress-{}", self.mirror_url, netloc))
    }

    /// Computed on every call so it always reflects the latest probe data
    pub fn sort_key(&self) -> SortKey {
        SortKey {
            available: self.is_available(),
            not_updating: !self.is_updating.unwrap_or(false),
            freshness: -self.last_updated.unwrap_or(LAST_UPDATED_DEFAULT),
            bandwidth: self.bandwidth(),
        }
    }
}

impl PartialEq for CandidateMirror {
    fn eq(&self, other: &Self) -> bool {
        self.mirror_url == other.mirror_url
    }
}

impl Eq for CandidateMirror {}

impl Hash for CandidateMirror {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mirror_url.hash(state);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

/// Ranking key, compared field by field in declaration order.
///
/// Ascending order puts the best mirror last: availability dominates, then
/// not being mid-update, then freshness, then bandwidth.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub available: bool,
    pub not_updating: bool,
    /// Negated staleness in seconds
    pub freshness: i64,
    pub bandwidth: f64,
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.available
            .cmp(&other.available)
            .then(self.not_updating.cmp(&other.not_updating))
            .then(self.freshness.cmp(&other.freshness))
            .then(self.bandwidth.total_cmp(&other.bandwidth))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

/// Sort best-first
pub fn sort_best_first(mirrors: &mut [CandidateMirror]) {
    mirrors.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const RELEASE: &str = "Origin: Ubuntu\nDate: Sun, 25 Aug 2019 23:35:36 UTC\nSuite: bionic-security\n";

    fn probed(url: &str, body: &str, latency: f64) -> CandidateMirror {
        let mut mirror = CandidateMirror::new(url);
        mirror.record_release_probe(Some(Bytes::from(body.to_string())), latency, "Date:");
        mirror
    }

    #[test]
    fn test_url_normalization_defines_identity() {
        let a = CandidateMirror::new("http://mirror.example/ubuntu/");
        let b = CandidateMirror::new("http://mirror.example/ubuntu");
        assert_eq!(a.mirror_url(), "http://mirror.example/ubuntu");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert!(mirrors_are_equal("http://x/debian//", "http://x/debian"));
    }

    #[test]
    fn test_availability_requires_marker() {
        assert!(probed("http://a", RELEASE, 0.1).is_available());
        assert!(!probed("http://b", "<html>parked domain</html>", 0.1).is_available());

        let mut missing = CandidateMirror::new("http://c");
        missing.record_release_probe(None, 10.0, "Date:");
        assert!(!missing.is_available());
        assert_eq!(missing.bandwidth(), 0.0);
    }

    #[test]
    fn test_bandwidth() {
        let mirror = probed("http://a", "Date: x\n", 0.5);
        assert_eq!(mirror.bandwidth(), 16.0);
        assert_eq!(CandidateMirror::new("http://b").bandwidth(), 0.0);
    }

    #[test]
    fn test_release_timestamp() {
        let mirror = probed("http://a", RELEASE, 0.1);
        assert_eq!(mirror.release_timestamp(), Some(1566776136));
        assert_eq!(parse_release_date("Sun, 25 Aug 2019 23:35:36 +0000"), Some(1566776136));
        assert_eq!(parse_release_date("yesterday"), None);
    }

    #[test]
    fn test_archive_update_marker_url() {
        let mirror = CandidateMirror::new("http://ftp.example.org:8080/debian/");
        assert_eq!(
            mirror.archive_update_in_progress_url().as_deref(),
            Some("http://ftp.example.org:8080/debian/Archive-Update-in-Progress-ftp.example.org:8080")
        );
        assert_eq!(CandidateMirror::new("not a url").archive_update_in_progress_url(), None);
    }

    #[test]
    fn test_availability_dominates_everything() {
        let mut good = probed("http://good", RELEASE, 10.0);
        good.set_updating(true);

        // Huge bandwidth but no marker
        let fast_but_broken = probed("http://broken", &"x".repeat(100_000), 0.001);
        assert!(fast_but_broken.bandwidth() > good.bandwidth());
        assert!(good.sort_key() > fast_but_broken.sort_key());
    }

    #[test]
    fn test_updating_dominates_freshness_and_bandwidth() {
        let mut updating = probed("http://updating", RELEASE, 0.001);
        updating.set_updating(true);
        updating.set_last_updated(0);

        let mut idle = probed("http://idle", RELEASE, 5.0);
        idle.set_updating(false);
        idle.set_last_updated(3600 * 24);

        assert!(idle.sort_key() > updating.sort_key());
    }

    #[test]
    fn test_unknown_staleness_is_pessimistic() {
        let mut known = probed("http://known", RELEASE, 1.0);
        known.set_updating(false);
        known.set_last_updated(3600);

        let mut unknown = probed("http://unknown", RELEASE, 0.01);
        unknown.set_updating(false);

        assert!(known.sort_key() > unknown.sort_key());
    }

    #[test]
    fn test_unprobed_mirror_sorts_last() {
        let mut mirrors = vec![
            CandidateMirror::new("http://nothing"),
            probed("http://fresh", RELEASE, 0.2),
            probed("http://parked", "<html></html>", 0.2),
        ];
        sort_best_first(&mut mirrors);
        assert_eq!(mirrors[0].mirror_url(), "http://fresh");
        assert_eq!(mirrors[2].mirror_url(), "http://nothing");
    }
}
