//! Linux Mint mirror discovery
//!
//! Linux Mint has no archive for retired releases, so the backend never
//! reports an old-releases URL and releases are never treated as EOL.

use super::client::{FetchOptions, ProbeClient};
use super::geo::{self, MIN_COUNTRY_MIRRORS};
use super::{MirrorBackend, html_tables, html_text, row_cells, table_rows, unique_mirror_urls};
use crate::core::candidate::CandidateMirror;
use crate::core::releases::DistributorId;
use crate::{AptPilotError, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// HTML page listing the Linux Mint mirrors
pub const MIRRORS_URL: &str = "https://linuxmint.com/mirrors.php";
/// Linux Mint is built on Ubuntu and takes security updates from there
pub const SECURITY_URL: &str = "http://security.ubuntu.com/ubuntu";
pub const BASE_URL: &str = "http://packages.linuxmint.com";

const DEFAULT_SUITES: &[&str] = &["release"];
const VALID_SUITES: &[&str] = &["release"];
const VALID_COMPONENTS: &[&str] = &["main", "upstream", "import", "backport"];

pub struct LinuxMintBackend;

/// Region heading under which Linux Mint lists mirrors serving everyone
const WORLDWIDE: &str = "Worldwide";

/// Mirror URLs from the table rows mentioning `region`
pub(crate) fn region_mirrors(tables: &[&str], region: &str) -> Vec<String> {
    tables
        .iter()
        .flat_map(|table| table_rows(*table))
        .filter(|row| html_text(row).contains(region))
        .flat_map(row_cells)
        .filter(|cell| cell.starts_with("http://") || cell.starts_with("https://"))
        .collect()
}

#[async_trait]
impl MirrorBackend for LinuxMintBackend {
    fn distributor(&self) -> DistributorId {
        DistributorId::LinuxMint
    }

    async fn discover_mirrors(&self, client: &ProbeClient) -> Result<Vec<CandidateMirror>> {
        let started = Instant::now();
        info!("Discovering Linux Mint mirrors at {} ..", MIRRORS_URL);
        // The mirrors page names the United States "USA"
        let region = match geo::locate_country(client).await {
            Some(country) if country == "United States" => "USA".to_string(),
            Some(country) => country,
            None => WORLDWIDE.to_string(),
        };

        let quick = FetchOptions {
            timeout: Duration::from_secs(15),
            ..FetchOptions::default()
        };
        let page = match client.fetch(MIRRORS_URL, quick).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Fetching {} failed ({}), trying again", MIRRORS_URL, e);
                let patient = FetchOptions {
                    timeout: Duration::from_secs(70),
                    retry: true,
                    ..FetchOptions::default()
                };
                client.fetch(MIRRORS_URL, patient).await?
            }
        };

        let html = String::from_utf8_lossy(&page);
        let tables = html_tables(&html);
        if tables.is_empty() {
            return Err(AptPilotError::Discovery(format!(
                "Failed to locate <table> element in Linux Mint mirror page! ({})",
                MIRRORS_URL
            )));
        }

        let mut urls = region_mirrors(&tables, &region);
        if urls.len() < MIN_COUNTRY_MIRRORS && region != WORLDWIDE {
            info!("Too few Linux Mint mirrors found in {}, adding worldwide mirrors", region);
            urls.extend(region_mirrors(&tables, WORLDWIDE));
        }

        let mirrors: Vec<CandidateMirror> = unique_mirror_urls(urls).iter().map(|url| CandidateMirror::new(url)).collect();
        if mirrors.is_empty() {
            return Err(AptPilotError::Discovery(format!(
                "Failed to discover any Linux Mint mirrors! (using {})",
                MIRRORS_URL
            )));
        }
        info!(
            "Discovered {} Linux Mint mirrors in {:.2}s",
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
        None
    }

    fn release_probe_url(&self, mirror_url: &str, codename: &str) -> String {
        format!("{}/dists/{}/Release", mirror_url.trim_end_matches('/'), codename)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourcesListRequest;
    use crate::testing::{FakeResponse, FakeTransport};
    use std::sync::Arc;

    const MIRROR_PAGE: &str = r#"
        <table><tr><td><a href="https://linuxmint.com/download.php">Download</a></td></tr></table>
        <table>
          <tr><td><img src="flags/NL.png"></td><td>Netherlands</td><td>https://mirror.one.example.nl/linuxmint-packages/</td></tr>
          <tr><td><img src="flags/NL.png"></td><td>Netherlands</td><td>http://mirror.two.example.nl/linuxmint/</td></tr>
          <tr><td><img src="flags/NL.png"></td><td>Netherlands</td><td>http://mirror.three.example.nl/linuxmint/</td></tr>
          <tr><td><img src="flags/US.png"></td><td>USA</td><td>http://mirror.example.com/linuxmint/</td></tr>
          <tr><td><img src="flags/WW.png"></td><td>Worldwide</td><td>http://mirror.example.net/linuxmint/</td></tr>
          <tr><td><img src="flags/WW.png"></td><td>Worldwide</td><td>ftp://ftp.example.net/linuxmint/</td></tr>
        </table>"#;

    fn located_in(transport: &FakeTransport, country: &str) {
        transport.respond(
            geo::IPAPI_CO_URL,
            FakeResponse::body(&format!(r#"{{"country_name": "{}"}}"#, country)),
        );
    }

    fn urls(mirrors: &[CandidateMirror]) -> Vec<&str> {
        mirrors.iter().map(|m| m.mirror_url()).collect()
    }

    #[tokio::test]
    async fn test_discover_mirrors_in_host_country() {
        let transport = Arc::new(FakeTransport::new());
        located_in(&transport, "Netherlands");
        transport.respond(MIRRORS_URL, FakeResponse::body(MIRROR_PAGE));
        let client = ProbeClient::new(transport.clone());

        let mirrors = LinuxMintBackend.discover_mirrors(&client).await.unwrap();
        assert_eq!(
            urls(&mirrors),
            vec![
                "https://mirror.one.example.nl/linuxmint-packages",
                "http://mirror.two.example.nl/linuxmint",
                "http://mirror.three.example.nl/linuxmint"
            ]
        );
    }

    #[tokio::test]
    async fn test_few_country_mirrors_add_worldwide_mirrors() {
        let transport = Arc::new(FakeTransport::new());
        located_in(&transport, "United States");
        transport.respond(MIRRORS_URL, FakeResponse::body(MIRROR_PAGE));
        let client = ProbeClient::new(transport.clone());

        let mirrors = LinuxMintBackend.discover_mirrors(&client).await.unwrap();
        assert_eq!(
            urls(&mirrors),
            vec!["http://mirror.example.com/linuxmint", "http://mirror.example.net/linuxmint"]
        );
    }

    #[tokio::test]
    async fn test_unknown_location_uses_worldwide_mirrors() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(MIRRORS_URL, FakeResponse::body(MIRROR_PAGE));
        let client = ProbeClient::new(transport.clone());

        let mirrors = LinuxMintBackend.discover_mirrors(&client).await.unwrap();
        assert_eq!(urls(&mirrors), vec!["http://mirror.example.net/linuxmint"]);
    }

    #[test]
    fn test_no_archive_and_plain_release_probe() {
        assert_eq!(LinuxMintBackend.old_releases_url(), None);
        assert_eq!(
            LinuxMintBackend.release_probe_url(BASE_URL, "vanessa"),
            "http://packages.linuxmint.com/dists/vanessa/Release"
        );
    }

    #[test]
    fn test_generate_sources_list() {
        let request = SourcesListRequest {
            mirror_url: BASE_URL.to_string(),
            codename: "wilma".to_string(),
            ..Default::default()
        };
        assert_eq!(
            LinuxMintBackend.generate_sources_list(&request).unwrap(),
            "deb http://packages.linuxmint.com wilma main upstream import backport"
        );
    }

    #[tokio::test]
    async fn test_discover_retries_after_failed_first_attempt() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond_sequence(
            MIRRORS_URL,
            vec![
                FakeResponse::Status(502),
                FakeResponse::body("<table><tr><td>Worldwide</td><td>http://mirror.example.org/linuxmint/</td></tr></table>"),
            ],
        );
        let client = ProbeClient::new(transport.clone());

        let mirrors = LinuxMintBackend.discover_mirrors(&client).await.unwrap();
        assert_eq!(mirrors.len(), 1);
        assert_eq!(transport.calls(MIRRORS_URL), 2);
    }
}
