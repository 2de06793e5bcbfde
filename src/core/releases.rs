//! Static release metadata for Debian, Ubuntu and Linux Mint
//!
//! A bundled table is merged with the `distro-info-data` CSV files when the
//! system has them, so newer releases are picked up without a rebuild.

use crate::{AptPilotError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

const BUNDLED_RELEASES: &str = include_str!("releases.toml");

/// Directory with the `distro-info-data` CSV files
pub const DISTRO_INFO_DIRECTORY: &str = "/usr/share/distro-info";

pub const DEBIAN_KEYRING_CURRENT: &str = "/usr/share/keyrings/debian-archive-keyring.gpg";
pub const UBUNTU_KEYRING_CURRENT: &str = "/usr/share/keyrings/ubuntu-archive-keyring.gpg";
pub const UBUNTU_KEYRING_REMOVED: &str = "/usr/share/keyrings/ubuntu-archive-removed-keys.gpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DistributorId {
    #[serde(rename = "debian")]
    Debian,
    #[serde(rename = "ubuntu")]
    Ubuntu,
    #[serde(rename = "linuxmint")]
    LinuxMint,
}

impl DistributorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributorId::Debian => "debian",
            DistributorId::Ubuntu => "ubuntu",
            DistributorId::LinuxMint => "linuxmint",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DistributorId::Debian => "Debian",
            DistributorId::Ubuntu => "Ubuntu",
            DistributorId::LinuxMint => "Linux Mint",
        }
    }
}

impl FromStr for DistributorId {
    type Err = AptPilotError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "debian" => Ok(DistributorId::Debian),
            "ubuntu" => Ok(DistributorId::Ubuntu),
            "linuxmint" | "linux mint" => Ok(DistributorId::LinuxMint),
            other => {
                let mut name = other.to_string();
                if let Some(first) = name.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                Err(AptPilotError::UnsupportedPlatform(name))
            }
        }
    }
}

impl fmt::Display for DistributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Release {
    pub distributor_id: DistributorId,
    /// Full name, e.g. `Bionic Beaver`
    pub codename: String,
    /// Short name used in sources lists, e.g. `bionic`
    pub series: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created_date: Option<NaiveDate>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub eol_date: Option<NaiveDate>,
    #[serde(default)]
    pub extended_eol_date: Option<NaiveDate>,
    #[serde(default)]
    pub lts: bool,
}

impl Release {
    /// The date support actually ends: extended support wins over the regular EOL
    pub fn effective_eol_date(&self) -> Option<NaiveDate> {
        self.extended_eol_date.or(self.eol_date)
    }

    pub fn is_eol(&self, today: NaiveDate) -> bool {
        self.effective_eol_date().is_some_and(|eol| today >= eol)
    }

    pub fn numeric_version(&self) -> Option<f64> {
        self.version.as_deref().and_then(parse_version)
    }

    /// Keyring with the archive signing keys for this release
    pub fn keyring_file(&self) -> Result<&'static str> {
        match self.distributor_id {
            DistributorId::Debian => Ok(DEBIAN_KEYRING_CURRENT),
            DistributorId::Ubuntu => match self.numeric_version() {
                Some(version) if version <= 12.04 => Ok(UBUNTU_KEYRING_REMOVED),
                _ => Ok(UBUNTU_KEYRING_CURRENT),
            },
            DistributorId::LinuxMint => Err(AptPilotError::UnsupportedPlatform(format!(
                "{} (no debootstrap keyring for {})",
                self.distributor_id, self.series
            ))),
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        self.series.eq_ignore_ascii_case(name)
            || self
                .codename
                .split_whitespace()
                .any(|word| word.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.distributor_id)?;
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
            if self.lts {
                write!(f, " LTS")?;
            }
        }
        write!(f, " ({})", self.codename)
    }
}

/// Strip suffixes like ` LTS` and parse the leading number
fn parse_version(value: &str) -> Option<f64> {
    value
        .split_whitespace()
        .next()
        .and_then(|number| number.parse::<f64>().ok())
        .filter(|number| *number > 0.0)
}

#[derive(Debug, Deserialize)]
struct ReleaseTable {
    #[serde(default)]
    release: Vec<Release>,
}

/// Known releases with lookup by codename or version
#[derive(Debug, Clone)]
pub struct ReleaseCatalog {
    releases: Vec<Release>,
}

impl ReleaseCatalog {
    pub fn from_releases(releases: Vec<Release>) -> Self {
        Self { releases }
    }

    /// Releases compiled into the binary
    pub fn bundled() -> Result<Self> {
        let table: ReleaseTable = toml::from_str(BUNDLED_RELEASES)
            .map_err(|e| AptPilotError::Config(format!("Failed to parse bundled release table: {}", e)))?;
        Ok(Self::from_releases(table.release))
    }

    /// Bundled releases merged with whatever `/usr/share/distro-info` provides
    pub async fn discover() -> Result<Self> {
        let mut catalog = Self::bundled()?;
        catalog.merge_distro_info(Path::new(DISTRO_INFO_DIRECTORY)).await;
        Ok(catalog)
    }

    /// Merge every `<distributor>.csv` in `directory`. Unreadable or unknown
    /// files are skipped.
    pub async fn merge_distro_info(&mut self, directory: &Path) {
        let Ok(mut entries) = tokio::fs::read_dir(directory).await else {
            debug!("No distro-info data in {}", directory.display());
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(distributor) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<DistributorId>().ok())
            else {
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => {
                    let releases = parse_distro_info_csv(distributor, &contents);
                    debug!("Loaded {} releases from {}", releases.len(), path.display());
                    self.merge(releases);
                }
                Err(e) => warn!("Failed to read {}: {}", path.display(), e),
            }
        }
    }

    /// Add releases, replacing existing entries for the same distributor and series
    pub fn merge(&mut self, releases: Vec<Release>) {
        for release in releases {
            match self
                .releases
                .iter_mut()
                .find(|r| r.distributor_id == release.distributor_id && r.series == release.series)
            {
                Some(existing) => *existing = release,
                None => self.releases.push(release),
            }
        }
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    /// Find the single release matching a version number or codename.
    ///
    /// Numeric strings match versions, anything else matches the series or
    /// a word of the codename, ignoring case.
    pub fn lookup(&self, value: &str) -> Result<&Release> {
        let value = value.trim();
        let matches: Vec<&Release> = match parse_version(value).filter(|_| !value.contains(' ')) {
            Some(version) => self
                .releases
                .iter()
                .filter(|r| r.numeric_version() == Some(version))
                .collect(),
            None => self.releases.iter().filter(|r| r.matches_name(value)).collect(),
        };
        match matches.as_slice() {
            [release] => Ok(release),
            [] => Err(AptPilotError::UnknownRelease(value.to_string())),
            many => Err(AptPilotError::AmbiguousRelease {
                value: value.to_string(),
                count: many.len(),
            }),
        }
    }
}

/// Parse a `distro-info-data` CSV file
/// (`version,codename,series,created,release,eol[,eol-server,...]`)
pub fn parse_distro_info_csv(distributor: DistributorId, contents: &str) -> Vec<Release> {
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let column = |name: &str| columns.iter().position(|c| *c == name);
    let (Some(codename_col), Some(series_col)) = (column("codename"), column("series")) else {
        warn!("Unexpected distro-info header for {}: {}", distributor, header);
        return Vec::new();
    };
    let version_col = column("version");
    let created_col = column("created");
    let release_col = column("release");
    let eol_col = column("eol");
    let eol_server_col = column("eol-server");

    lines
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let field = |idx: Option<usize>| idx.and_then(|i| fields.get(i)).copied().filter(|f| !f.is_empty());
            let date = |idx: Option<usize>| field(idx).and_then(|f| NaiveDate::parse_from_str(f, "%Y-%m-%d").ok());

            let series = field(Some(series_col))?.to_string();
            let version = field(version_col).map(str::to_string);
            let lts = match distributor {
                DistributorId::Ubuntu => version.as_deref().is_some_and(|v| v.contains("LTS")),
                DistributorId::Debian => crate::registry::debian::DebianBackend::lts_eol_date(&series).is_some(),
                DistributorId::LinuxMint => false,
            };
            let extended_eol_date = match distributor {
                DistributorId::Debian => crate::registry::debian::DebianBackend::lts_eol_date(&series),
                _ => date(eol_server_col),
            };

            Some(Release {
                distributor_id: distributor,
                codename: field(Some(codename_col)).unwrap_or(series.as_str()).to_string(),
                version: version.map(|v| v.trim_end_matches(" LTS").to_string()),
                created_date: date(created_col),
                release_date: date(release_col),
                eol_date: date(eol_col),
                extended_eol_date,
                lts,
                series,
            })
        })
        .collect()
}
