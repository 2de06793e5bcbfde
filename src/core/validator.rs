use crate::core::candidate::{CandidateMirror, normalize_mirror_url};
use crate::registry::MirrorBackend;
use crate::registry::client::{FetchError, ProbeClient};
use rustc_hash::FxHashMap;
use std::fmt;
use tracing::{debug, info};
use url::Url;

/// Outcome of checking whether a mirror serves a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorStatus {
    Available,
    /// The mirror answered 404, the release may have been retired
    MaybeEol,
    Unavailable,
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MirrorStatus::Available => "available",
            MirrorStatus::MaybeEol => "maybe EOL",
            MirrorStatus::Unavailable => "unavailable",
        })
    }
}

/// Session-scoped memo of mirror statuses keyed by `(normalized URL, codename)`.
///
/// An answer is never re-validated, even when it came from a transient failure.
#[derive(Debug, Default)]
pub struct MirrorValidator {
    validated: FxHashMap<(String, String), MirrorStatus>,
}

impl MirrorValidator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cached(&self, mirror_url: &str, codename: &str) -> Option<MirrorStatus> {
        self.validated
            .get(&(normalize_mirror_url(mirror_url), codename.to_string()))
            .copied()
    }

    /// Make sure `mirror_url` serves `codename`
    pub async fn validate(
        &mut self,
        client: &ProbeClient,
        backend: &dyn MirrorBackend,
        mirror_url: &str,
        codename: &str,
    ) -> MirrorStatus {
        let mirror_url = normalize_mirror_url(mirror_url);
        let key = (mirror_url.clone(), codename.to_string());
        if let Some(status) = self.validated.get(&key) {
            return *status;
        }

        let status = Self::probe(client, backend, &mirror_url, codename).await;
        debug!("Mirror {} is {} for {}", mirror_url, status, codename);
        self.validated.insert(key, status);
        status
    }

    async fn probe(client: &ProbeClient, backend: &dyn MirrorBackend, mirror_url: &str, codename: &str) -> MirrorStatus {
        if Url::parse(mirror_url).is_err() {
            debug!("{:?} is not a valid URL, considering it unavailable", mirror_url);
            return MirrorStatus::Unavailable;
        }

        info!("Checking if {} is available on {} ..", codename, mirror_url);
        let probe_url = backend.release_probe_url(mirror_url, codename);
        match client.fetch_url(&probe_url, false).await {
            Ok(body) => {
                let mut mirror = CandidateMirror::new(mirror_url);
                mirror.record_release_probe(Some(body), 0.0, backend.availability_marker());
                if mirror.is_available() {
                    MirrorStatus::Available
                } else {
                    MirrorStatus::Unavailable
                }
            }
            Err(FetchError::NotFound(_)) => MirrorStatus::MaybeEol,
            Err(_) => MirrorStatus::Unavailable,
        }
    }
}
