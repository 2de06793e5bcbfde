use crate::core::releases::Release;
use crate::core::validator::{MirrorStatus, MirrorValidator};
use crate::registry::MirrorBackend;
use crate::registry::client::ProbeClient;
use chrono::NaiveDate;
use std::fmt;
use tracing::{debug, info};

/// What decided the EOL verdict, first applicable wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolSource {
    BackendOverride,
    ReleaseTable,
    SecurityMirror,
}

impl fmt::Display for EolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EolSource::BackendOverride => "custom EOL dates",
            EolSource::ReleaseTable => "known EOL dates",
            EolSource::SecurityMirror => "security mirror",
        })
    }
}

/// Everything the resolver needs to know about the running system
pub struct EolQuery<'a> {
    pub client: &'a ProbeClient,
    pub backend: &'a dyn MirrorBackend,
    pub release: &'a Release,
    pub architecture: &'a str,
    pub today: NaiveDate,
}

/// Decide whether the release is end of life.
///
/// A positive verdict only stands when the old-releases mirror actually
/// serves the release; distributors without such a mirror are never EOL.
pub async fn resolve_release_eol(query: EolQuery<'_>, validator: &mut MirrorValidator) -> bool {
    let EolQuery {
        client,
        backend,
        release,
        architecture,
        today,
    } = query;
    let codename = release.series.as_str();
    debug!("Checking whether {} is EOL ..", release);

    let (seems_eol, source) = if let Some(date) = backend.eol_override(codename, architecture) {
        (today >= date, EolSource::BackendOverride)
    } else if release.effective_eol_date().is_some() {
        (release.is_eol(today), EolSource::ReleaseTable)
    } else {
        let status = validator
            .validate(client, backend, backend.security_url(), codename)
            .await;
        (status == MirrorStatus::MaybeEol, EolSource::SecurityMirror)
    };

    if !seems_eol {
        info!("{} is supported (based on {})", release, source);
        return false;
    }

    let Some(old_releases_url) = backend.old_releases_url() else {
        info!(
            "{} seems EOL (based on {}), but {} has no old releases mirror, so acting as not EOL",
            release,
            source,
            backend.distributor()
        );
        return false;
    };

    info!("{} seems EOL, checking {} to confirm", release, old_releases_url);
    let confirmed = validator.validate(client, backend, old_releases_url, codename).await == MirrorStatus::Available;
    if confirmed {
        info!("{} is EOL (based on {})", release, source);
    } else {
        info!("{} is supported ({} is not available)", release, old_releases_url);
    }
    confirmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::releases::ReleaseCatalog;
    use crate::testing::{FakeBackend, FakeResponse, FakeTransport, fake_client, release_file};
    use std::sync::Arc;

    const OLD: &str = "http://old.example/ubuntu";
    const SECURITY: &str = "http://security.example/ubuntu";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn release(series: &str) -> Release {
        ReleaseCatalog::bundled().unwrap().lookup(series).unwrap().clone()
    }

    fn serve(transport: &FakeTransport, mirror: &str, series: &str) {
        transport.respond(
            &format!("{}/dists/{}/Release", mirror, series),
            release_file("Thu, 01 Jun 2023 00:00:00 UTC"),
        );
    }

    async fn resolve(transport: &Arc<FakeTransport>, backend: &FakeBackend, release: &Release) -> bool {
        let client = fake_client(transport);
        let mut validator = MirrorValidator::new();
        resolve_release_eol(
            EolQuery {
                client: &client,
                backend,
                release,
                architecture: "amd64",
                today: today(),
            },
            &mut validator,
        )
        .await
    }

    #[tokio::test]
    async fn test_past_eol_confirmed_by_old_releases_mirror() {
        let transport = Arc::new(FakeTransport::new());
        serve(&transport, OLD, "bionic");
        assert!(resolve(&transport, &FakeBackend::new(&[]), &release("bionic")).await);
    }

    #[tokio::test]
    async fn test_unconfirmed_eol_is_not_eol() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(&format!("{}/dists/bionic/Release", OLD), FakeResponse::NotFound);
        assert!(!resolve(&transport, &FakeBackend::new(&[]), &release("bionic")).await);
    }

    #[tokio::test]
    async fn test_supported_release_skips_network() {
        let transport = Arc::new(FakeTransport::new());
        assert!(!resolve(&transport, &FakeBackend::new(&[]), &release("noble")).await);
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_override_wins_over_table() {
        let transport = Arc::new(FakeTransport::new());
        serve(&transport, OLD, "bionic");
        let mut backend = FakeBackend::new(&[]);
        backend.eol_override = NaiveDate::from_ymd_opt(2030, 1, 1);

        assert!(!resolve(&transport, &backend, &release("bionic")).await);
    }

    #[tokio::test]
    async fn test_security_mirror_fallback() {
        let mut unknown = release("noble");
        unknown.series = "resolute".to_string();
        unknown.eol_date = None;
        unknown.extended_eol_date = None;

        let transport = Arc::new(FakeTransport::new());
        transport.respond(&format!("{}/dists/resolute/Release", SECURITY), FakeResponse::NotFound);
        serve(&transport, OLD, "resolute");
        assert!(resolve(&transport, &FakeBackend::new(&[]), &unknown).await);

        let transport = Arc::new(FakeTransport::new());
        serve(&transport, SECURITY, "resolute");
        assert!(!resolve(&transport, &FakeBackend::new(&[]), &unknown).await);
    }

    #[tokio::test]
    async fn test_no_old_releases_mirror_means_never_eol() {
        let transport = Arc::new(FakeTransport::new());
        let mut backend = FakeBackend::new(&[]);
        backend.old_releases = None;

        assert!(!resolve(&transport, &backend, &release("tricia")).await);
        assert_eq!(transport.total_calls(), 0);
    }
}
