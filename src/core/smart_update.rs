//! Self-healing `apt-get update`
//!
//! Failures are classified from apt's output, in this order:
//! a 404 from the current mirror may mean the release went EOL, a hash sum
//! mismatch means the mirror is inconsistent, anything else is treated as
//! transient and retried after a growing delay.

use crate::constants::{BACKOFF_DOUBLING_LIMIT, INITIAL_BACKOFF, MAX_BACKOFF};
use crate::core::candidate::{mirrors_are_equal, normalize_mirror_url};
use crate::core::updater::MirrorUpdater;
use crate::{AptPilotError, Result};
use std::time::Duration;
use tracing::{info, warn};

/// Delays between failed update attempts: doubling up to two minutes, then
/// growing by a third, never above [`MAX_BACKOFF`]
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { next: INITIAL_BACKOFF }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = if current <= BACKOFF_DOUBLING_LIMIT {
            current * 2
        } else {
            current + current / 3
        };
        self.next = grown.min(MAX_BACKOFF);
        Some(current)
    }
}

/// Whether apt reported a 404 for `mirror_url`.
///
/// Only 404s on lines naming the current mirror count, so a retired PPA
/// doesn't make the whole release look EOL. Newer apt versions print the
/// status on an indented line after the `Err:` line.
pub fn suspects_eol(output: &str, mirror_url: &str) -> bool {
    let mirror = normalize_mirror_url(mirror_url);
    let has_404 = |line: &str| line.split_whitespace().any(|token| token == "404");
    let lines: Vec<&str> = output.lines().collect();
    lines.iter().enumerate().any(|(idx, line)| {
        if !line.contains(&mirror) {
            return false;
        }
        has_404(line)
            || lines
                .get(idx + 1)
                .is_some_and(|next| next.starts_with(char::is_whitespace) && has_404(next))
    })
}

pub fn has_hash_sum_mismatch(output: &str) -> bool {
    output.to_lowercase().contains("hash sum mismatch")
}

impl MirrorUpdater {
    /// Update the package lists, switching mirrors when that fixes the
    /// failure and `switch_mirrors` allows it.
    ///
    /// Fails right away when the release turns out to be EOL and switching
    /// is not allowed, and after `max_attempts` consecutive failures.
    pub async fn smart_update(&mut self, max_attempts: u32, switch_mirrors: bool) -> Result<()> {
        let max_attempts = max_attempts.max(1);
        let mut backoff = Backoff::new();

        for attempt in 1..=max_attempts {
            let output = self.run_update().await?;
            if output.success {
                info!("Finished updating package lists of {}.", self.context().describe());
                return Ok(());
            }
            if attempt == max_attempts {
                break;
            }

            let current = self.current_mirror().await.ok();
            if current.as_deref().is_some_and(|mirror| suspects_eol(&output.output, mirror)) {
                warn!("{} may be EOL, checking ..", self.release());
                if self.release_is_eol().await {
                    if !switch_mirrors {
                        return Err(AptPilotError::ReleaseIsEol(self.codename().to_string()));
                    }
                    match self.old_releases_url() {
                        Some(old_releases)
                            if current.as_deref().is_some_and(|mirror| mirrors_are_equal(mirror, old_releases)) =>
                        {
                            warn!("Already using old releases mirror {}, not switching again", old_releases);
                        }
                        Some(old_releases) => {
                            warn!("Switching to old releases mirror because {} is EOL ..", self.release());
                            self.switch_mirror(old_releases).await?;
                            continue;
                        }
                        None => {}
                    }
                }
            }

            if switch_mirrors && has_hash_sum_mismatch(&output.output) {
                if let Some(current) = current {
                    warn!("Detected 'hash sum mismatch' failure, switching to other mirror ..");
                    self.ignore_mirror(&glob::Pattern::escape(&current))?;
                    let best = self.best_mirror().await?;
                    info!("Selected mirror: {}", best);
                    self.switch_mirror(&best).await?;
                    continue;
                }
            }

            warn!("Retrying after `apt-get update' failed ({}/{}) ..", attempt, max_attempts);
            if let Some(delay) = backoff.next() {
                info!("Sleeping for {:.0}s before retrying update ..", delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }
        }

        Err(AptPilotError::UpdateExhausted(max_attempts))
    }
}
