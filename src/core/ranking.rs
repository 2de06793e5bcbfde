//! Concurrent two-round mirror ranking
//!
//! Round one fetches every candidate's release metadata to decide
//! availability, bandwidth and freshness. Round two looks for the
//! Archive-Update-in-Progress marker, but only on mirrors that survived
//! round one.

use crate::core::candidate::{CandidateMirror, mirrors_are_equal, sort_best_first};
use crate::registry::MirrorBackend;
use crate::registry::client::ProbeClient;
use crate::utils::progress::ProgressTracker;
use crate::{AptPilotError, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Mirrors ordered best first
#[derive(Debug, Clone)]
pub struct RankedMirrors {
    pub mirrors: Vec<CandidateMirror>,
    /// Every available mirror advertised an update in progress
    pub all_updating: bool,
}

impl RankedMirrors {
    pub fn best(&self) -> Option<&CandidateMirror> {
        self.mirrors.first()
    }

    pub fn available(&self) -> impl Iterator<Item = &CandidateMirror> {
        self.mirrors.iter().filter(|m| m.is_available())
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankingOptions {
    /// Upper bound on probed candidates, 0 means unlimited
    pub max_count: usize,
    pub concurrency: usize,
}

/// Probe and order `candidates` for `codename`.
///
/// The backend's base mirror is never truncated away since its release date
/// is the staleness reference. Fails when no candidate is available.
pub async fn rank_mirrors(
    client: &ProbeClient,
    backend: &dyn MirrorBackend,
    codename: &str,
    mut candidates: Vec<CandidateMirror>,
    options: RankingOptions,
    progress: &ProgressTracker,
) -> Result<RankedMirrors> {
    let started = Instant::now();
    let base_url = backend.base_mirror();

    sort_best_first(&mut candidates);
    if options.max_count > 0 && candidates.len() > options.max_count {
        let base = candidates
            .iter()
            .position(|c| mirrors_are_equal(c.mirror_url(), base_url))
            .filter(|idx| *idx >= options.max_count)
            .map(|idx| candidates.swap_remove(idx));
        candidates.truncate(options.max_count);
        candidates.extend(base);
    }

    let total = candidates.len();
    info!("Checking {} mirrors for availability and performance ..", total);
    let probe_urls: Vec<String> = candidates
        .iter()
        .map(|c| backend.release_probe_url(c.mirror_url(), codename))
        .collect();
    let spinner = progress.add_spinner("Checking mirrors");
    let results = client.fetch_concurrent(probe_urls, options.concurrency).await;
    spinner.finish_and_clear();

    let marker = backend.availability_marker();
    for (candidate, result) in candidates.iter_mut().zip(results) {
        candidate.record_release_probe(result.body, result.elapsed.as_secs_f64(), marker);
    }

    apply_staleness(&mut candidates, base_url);

    let updating: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_available())
        .map(|(idx, _)| idx)
        .collect();
    info!("Checking {} mirrors for Archive-Update-in-Progress marker ..", updating.len());
    let marker_urls: Vec<String> = updating
        .iter()
        .filter_map(|idx| candidates[*idx].archive_update_in_progress_url())
        .collect();
    let spinner = progress.add_spinner("Checking mirrors");
    let results = client.fetch_concurrent(marker_urls, options.concurrency).await;
    spinner.finish_and_clear();
    for result in results {
        if let Some(candidate) = candidates
            .iter_mut()
            .find(|c| c.archive_update_in_progress_url().as_deref() == Some(result.url.as_str()))
        {
            candidate.set_updating(result.body.is_some());
        }
    }

    info!(
        "Finished checking {} mirrors (took {:.2}s)",
        total,
        started.elapsed().as_secs_f64()
    );

    let available: Vec<&CandidateMirror> = candidates.iter().filter(|c| c.is_available()).collect();
    if available.is_empty() {
        return Err(AptPilotError::AllMirrorsUnavailable(total));
    }
    let all_updating = available.iter().all(|c| c.is_updating() == Some(true));
    if all_updating {
        warn!("It looks like all {} available mirrors are being updated?!", available.len());
    }

    sort_best_first(&mut candidates);
    Ok(RankedMirrors {
        mirrors: candidates,
        all_updating,
    })
}

/// Derive each available mirror's lag from its `Date:` field.
///
/// The base mirror defines the reference time and is itself up to date.
/// Without it the current time is the reference.
fn apply_staleness(candidates: &mut [CandidateMirror], base_url: &str) {
    let base_timestamp = candidates
        .iter_mut()
        .find(|c| c.is_available() && mirrors_are_equal(c.mirror_url(), base_url))
        .and_then(|base| {
            let timestamp = base.release_timestamp()?;
            base.set_last_updated(0);
            Some(timestamp)
        });

    let reference = match base_timestamp {
        Some(timestamp) => {
            debug!("Reference release date from {}: {}", base_url, timestamp);
            timestamp
        }
        None => {
            let now = chrono::Utc::now().timestamp();
            warn!("{} is not available, using the current time as the reference release date", base_url);
            now
        }
    };

    for candidate in candidates
        .iter_mut()
        .filter(|c| c.is_available() && !mirrors_are_equal(c.mirror_url(), base_url))
    {
        if let Some(timestamp) = candidate.release_timestamp() {
            candidate.set_last_updated((reference - timestamp).max(0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeResponse, FakeTransport, fake_client, release_file};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    const CODENAME: &str = "jammy";
    const BASE: &str = "http://base.example/ubuntu";

    fn probe(mirror: &str) -> String {
        format!("{}/dists/{}/Release", mirror, CODENAME)
    }

    fn marker(mirror: &str) -> String {
        CandidateMirror::new(mirror).archive_update_in_progress_url().unwrap()
    }

    fn options(max_count: usize) -> RankingOptions {
        RankingOptions {
            max_count,
            concurrency: 4,
        }
    }

    fn candidates(urls: &[&str]) -> Vec<CandidateMirror> {
        urls.iter().map(|u| CandidateMirror::new(u)).collect()
    }

    #[tokio::test]
    async fn test_availability_then_updating_then_bandwidth() {
        let transport = Arc::new(FakeTransport::new());
        let date = "Sun, 25 Aug 2019 23:35:36 UTC";
        // A fails every probe
        transport.respond(&probe("http://b.example"), release_file(date));
        transport.respond(&marker("http://b.example"), FakeResponse::body(""));
        transport.respond(
            &probe("http://c.example"),
            FakeResponse::Delayed(
                Duration::from_millis(50),
                Bytes::from(format!("Date: {}\n", date)),
            ),
        );

        let client = fake_client(&transport);
        let backend = FakeBackend::new(&[]);
        let ranked = rank_mirrors(
            &client,
            &backend,
            CODENAME,
            candidates(&["http://a.example", "http://b.example", "http://c.example"]),
            options(0),
            &ProgressTracker::hidden(),
        )
        .await
        .unwrap();

        let order: Vec<&str> = ranked.mirrors.iter().map(|m| m.mirror_url()).collect();
        assert_eq!(order, vec!["http://c.example", "http://b.example", "http://a.example"]);
        assert_eq!(ranked.mirrors[1].is_updating(), Some(true));
        assert_eq!(ranked.mirrors[0].is_updating(), Some(false));
        assert!(!ranked.all_updating);
        // The unavailable mirror never gets a marker probe
        assert_eq!(transport.calls(&marker("http://a.example")), 0);
    }

    #[tokio::test]
    async fn test_all_unavailable_is_fatal() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(&probe("http://a.example"), FakeResponse::NotFound);
        transport.respond(&probe("http://b.example"), FakeResponse::body("<html></html>"));

        let client = fake_client(&transport);
        let backend = FakeBackend::new(&[]);
        let err = rank_mirrors(
            &client,
            &backend,
            CODENAME,
            candidates(&["http://a.example", "http://b.example", "http://c.example"]),
            options(0),
            &ProgressTracker::hidden(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AptPilotError::AllMirrorsUnavailable(3)));
    }

    #[tokio::test]
    async fn test_all_updating_is_a_warning_not_an_error() {
        let transport = Arc::new(FakeTransport::new());
        for mirror in ["http://a.example", "http://b.example"] {
            transport.respond(&probe(mirror), release_file("Sun, 25 Aug 2019 23:35:36 UTC"));
            transport.respond(&marker(mirror), FakeResponse::body(""));
        }

        let client = fake_client(&transport);
        let backend = FakeBackend::new(&[]);
        let ranked = rank_mirrors(
            &client,
            &backend,
            CODENAME,
            candidates(&["http://a.example", "http://b.example"]),
            options(0),
            &ProgressTracker::hidden(),
        )
        .await
        .unwrap();

        assert_eq!(ranked.len(), 2);
        assert!(ranked.all_updating);
    }

    #[tokio::test]
    async fn test_staleness_relative_to_base_mirror() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(&probe(BASE), release_file("Mon, 26 Aug 2019 00:00:00 UTC"));
        transport.respond(&probe("http://lagging.example"), release_file("Sun, 25 Aug 2019 22:00:00 UTC"));
        transport.respond(&probe("http://fresh.example"), release_file("Mon, 26 Aug 2019 00:00:00 UTC"));

        let client = fake_client(&transport);
        let backend = FakeBackend::new(&[]);
        let ranked = rank_mirrors(
            &client,
            &backend,
            CODENAME,
            candidates(&[BASE, "http://lagging.example", "http://fresh.example"]),
            options(0),
            &ProgressTracker::hidden(),
        )
        .await
        .unwrap();

        let lag = |url: &str| ranked.mirrors.iter().find(|m| m.mirror_url() == url).unwrap().last_updated();
        assert_eq!(lag(BASE), Some(0));
        assert_eq!(lag("http://fresh.example"), Some(0));
        assert_eq!(lag("http://lagging.example"), Some(2 * 3600));
        assert_eq!(ranked.mirrors.last().unwrap().mirror_url(), "http://lagging.example");
    }

    #[tokio::test]
    async fn test_truncation_keeps_base_mirror() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(&probe(BASE), release_file("Mon, 26 Aug 2019 00:00:00 UTC"));

        let mut pool = candidates(&["http://1.example", "http://2.example", "http://3.example", "http://4.example"]);
        // Discovery hints push the base mirror to the end of the pre-sort
        for mirror in pool.iter_mut() {
            mirror.set_last_updated(60);
        }
        pool.push(CandidateMirror::new(BASE));

        let client = fake_client(&transport);
        let backend = FakeBackend::new(&[]);
        let ranked = rank_mirrors(&client, &backend, CODENAME, pool, options(2), &ProgressTracker::hidden())
            .await
            .unwrap();

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked.best().unwrap().mirror_url(), BASE);
        assert_eq!(transport.calls(&probe("http://3.example")), 0);
        assert_eq!(transport.calls(&probe("http://4.example")), 0);
    }
}
