//! Reading and rewriting apt's package resource list

use crate::core::candidate::normalize_mirror_url;
use crate::core::context::SystemContext;
use crate::core::releases::{Release, ReleaseCatalog};
use crate::{AptPilotError, Result};
use tracing::{debug, info};

pub const MAIN_SOURCES_LIST: &str = "/etc/apt/sources.list";
/// Linux Mint keeps its official repositories out of `sources.list`
pub const MINT_SOURCES_LIST: &str = "/etc/apt/sources.list.d/official-package-repositories.list";
const MINT_BACKUP_DIRECTORY: &str = "backup_by_aptpilot";

const MIRROR_SCHEMES: &[&str] = &["http://", "https://", "ftp://", "mirror://", "mirror+file:/"];

/// The sources list apt reads the main mirror from
pub async fn main_sources_list_path(context: &dyn SystemContext) -> &'static str {
    if context.exists(MINT_SOURCES_LIST).await {
        debug!("{} exists, using it instead of {}", MINT_SOURCES_LIST, MAIN_SOURCES_LIST);
        MINT_SOURCES_LIST
    } else {
        MAIN_SOURCES_LIST
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SourceLine {
    raw: String,
    /// `raw` with any `[options]` block removed
    stripped: String,
    options: Option<String>,
    rewritten: Option<String>,
}

impl SourceLine {
    fn parse(raw: &str) -> Self {
        let (stripped, options) = match split_options(raw) {
            Some((stripped, options)) => (stripped, Some(options)),
            None => (raw.to_string(), None),
        };
        Self {
            raw: raw.to_string(),
            stripped,
            options,
            rewritten: None,
        }
    }

    fn tokens(&self) -> Vec<&str> {
        self.stripped.split_whitespace().collect()
    }

    /// `deb`/`deb-src` line for a network mirror that carries `main`
    fn main_entry(&self) -> Option<Vec<&str>> {
        let tokens = self.tokens();
        let is_main = tokens.len() >= 4
            && matches!(tokens[0], "deb" | "deb-src")
            && MIRROR_SCHEMES.iter().any(|scheme| tokens[1].starts_with(scheme))
            && tokens[3..].contains(&"main");
        is_main.then_some(tokens)
    }

    fn render(&self) -> &str {
        self.rewritten.as_deref().unwrap_or(&self.raw)
    }
}

/// Split the `[options]` block directly following `deb`/`deb-src` off a line
fn split_options(raw: &str) -> Option<(String, String)> {
    let line = raw.trim_start();
    let directive = line.split_whitespace().next()?;
    if !matches!(directive, "deb" | "deb-src") {
        return None;
    }
    let (options, rest) = line[directive.len()..].trim_start().strip_prefix('[')?.split_once(']')?;
    Some((format!("{} {}", directive, rest), options.trim().to_string()))
}

/// A parsed sources list that keeps untouched lines byte for byte
#[derive(Debug, Clone, PartialEq)]
pub struct SourcesList {
    lines: Vec<SourceLine>,
}

impl SourcesList {
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents.lines().map(SourceLine::parse).collect(),
        }
    }

    /// URL of the first main mirror entry
    pub fn find_current_mirror(&self) -> Result<String> {
        self.lines
            .iter()
            .find_map(|line| line.main_entry().map(|tokens| tokens[1].to_string()))
            .ok_or_else(|| AptPilotError::CurrentMirrorUnknown("apt's package resource list".to_string()))
    }

    /// Release of the first main mirror entry whose suite names exactly one
    /// known release
    pub fn find_release<'a>(&self, catalog: &'a ReleaseCatalog) -> Result<&'a Release> {
        self.lines
            .iter()
            .filter_map(SourceLine::main_entry)
            .find_map(|tokens| catalog.lookup(tokens[2]).ok())
            .ok_or_else(|| AptPilotError::CodenameUnknown("apt's package resource list".to_string()))
    }

    /// Point every entry using one of `old_mirrors` at `new_mirror`.
    /// Returns the number of rewritten lines.
    pub fn replace_mirrors(&mut self, old_mirrors: &[String], new_mirror: &str) -> usize {
        let old: Vec<String> = old_mirrors.iter().map(|m| normalize_mirror_url(m)).collect();
        self.replace_matching(|url| old.contains(&normalize_mirror_url(url)), new_mirror)
    }

    /// Point every entry whose mirror URL satisfies `matches` at `new_mirror`
    pub fn replace_matching<F>(&mut self, matches: F, new_mirror: &str) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut replaced = 0;
        for line in &mut self.lines {
            let mut tokens: Vec<String> = line.tokens().into_iter().map(str::to_string).collect();
            if tokens.len() < 4 || !matches!(tokens[0].as_str(), "deb" | "deb-src") || !matches(&tokens[1]) {
                continue;
            }
            tokens[1] = new_mirror.to_string();
            if let Some(options) = &line.options {
                tokens.insert(1, format!("[{}]", options));
            }
            line.rewritten = Some(tokens.join(" "));
            replaced += 1;
        }
        replaced
    }

    pub fn render(&self) -> String {
        let mut contents = self.lines.iter().map(SourceLine::render).collect::<Vec<_>>().join("\n");
        contents.push('\n');
        contents
    }
}

/// Replace the sources list at `path`, keeping a timestamped backup of the
/// previous contents. Returns the backup path, if one was made.
pub async fn install_sources_list(context: &dyn SystemContext, path: &str, contents: &str) -> Result<Option<String>> {
    info!("Installing new {} ..", path);
    let backup = if context.exists(path).await {
        let backup = backup_path(path, chrono::Utc::now().timestamp());
        info!("Backing up contents of {} to {} ..", path, backup);
        let previous = context.read_file(path).await?;
        context.write_file(&backup, &previous).await?;
        Some(backup)
    } else {
        None
    };

    let mut contents = contents.trim_end().to_string();
    contents.push('\n');
    context.write_file(path, &contents).await?;
    Ok(backup)
}

/// apt warns about unknown files in `sources.list.d`, so backups of Linux
/// Mint's list go into a subdirectory
fn backup_path(path: &str, timestamp: i64) -> String {
    if path == MINT_SOURCES_LIST {
        let (directory, name) = path.rsplit_once('/').unwrap_or((".", path));
        format!("{}/{}/{}.backup.{}", directory, MINT_BACKUP_DIRECTORY, name, timestamp)
    } else {
        format!("{}.backup.{}", path, timestamp)
    }
}
