//! Scripted stand-ins for the network, the host system and discovery

use crate::core::candidate::CandidateMirror;
use crate::core::context::{CommandOutput, SystemContext};
use crate::core::releases::DistributorId;
use crate::registry::MirrorBackend;
use crate::registry::client::{FetchError, ProbeClient, Transport};
use crate::{AptPilotError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum FakeResponse {
    Body(Bytes),
    /// Respond after a delay
    Delayed(Duration, Bytes),
    NotFound,
    Status(u16),
    /// Never respond
    Hang,
}

impl FakeResponse {
    pub fn body(text: &str) -> Self {
        FakeResponse::Body(Bytes::from(text.to_string()))
    }
}

/// Transport answering from a script. Unscripted URLs fail like a refused
/// connection. A scripted sequence is consumed in order and its last entry
/// repeats.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, VecDeque<FakeResponse>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: FakeResponse) {
        self.respond_sequence(url, vec![response]);
    }

    pub fn respond_sequence(&self, url: &str, responses: Vec<FakeResponse>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into_iter().collect());
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn next_response(&self, url: &str) -> Option<FakeResponse> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(url)?;
        if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> std::result::Result<Bytes, FetchError> {
        match self.next_response(url) {
            Some(FakeResponse::Body(body)) => Ok(body),
            Some(FakeResponse::Delayed(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            Some(FakeResponse::NotFound) => Err(FetchError::NotFound(url.to_string())),
            Some(FakeResponse::Status(status)) => Err(FetchError::InvalidResponse {
                url: url.to_string(),
                status,
            }),
            Some(FakeResponse::Hang) => std::future::pending().await,
            None => Err(FetchError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Probe client over a fake transport with a short timeout
pub fn fake_client(transport: &std::sync::Arc<FakeTransport>) -> ProbeClient {
    ProbeClient::new(transport.clone()).with_timeout(Duration::from_millis(200))
}

/// Release metadata body carrying a `Date:` field
pub fn release_file(date: &str) -> FakeResponse {
    FakeResponse::body(&format!("Origin: Test\nSuite: test\nDate: {}\nValid-Until: never\n", date))
}

/// In-memory system with a scripted `apt-get update`
#[derive(Default)]
pub struct FakeContext {
    files: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    update_outcomes: Mutex<VecDeque<CommandOutput>>,
}

impl FakeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_string());
        self
    }

    /// Queue outcomes for successive `apt-get update` runs; once drained
    /// every run succeeds
    pub fn with_update_outcomes(self, outcomes: Vec<CommandOutput>) -> Self {
        self.update_outcomes.lock().unwrap().extend(outcomes);
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl SystemContext for FakeContext {
    async fn read_file(&self, path: &str) -> Result<String> {
        self.file(path).ok_or_else(|| {
            AptPilotError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        })
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        self.files.lock().unwrap().insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files
            .lock()
            .unwrap()
            .keys()
            .any(|p| p == path || p.starts_with(&prefix))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ");
        self.commands.lock().unwrap().push(line);
        match (program, args.first().copied()) {
            ("apt-get", Some("update")) => Ok(self
                .update_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutput::success("Reading package lists... Done"))),
            ("dpkg", Some("--print-architecture")) => Ok(CommandOutput::success("amd64\n")),
            _ => Ok(CommandOutput::success("")),
        }
    }

    fn describe(&self) -> String {
        "fake system".to_string()
    }
}

/// Backend with a fixed mirror list and a discovery call counter
pub struct FakeBackend {
    pub distributor: DistributorId,
    pub mirrors: Vec<String>,
    pub base: &'static str,
    pub security: &'static str,
    pub old_releases: Option<&'static str>,
    pub eol_override: Option<NaiveDate>,
    discoveries: AtomicUsize,
}

impl FakeBackend {
    pub fn new(mirrors: &[&str]) -> Self {
        Self {
            distributor: DistributorId::Ubuntu,
            mirrors: mirrors.iter().map(|m| m.to_string()).collect(),
            base: "http://base.example/ubuntu",
            security: "http://security.example/ubuntu",
            old_releases: Some("http://old.example/ubuntu/"),
            eol_override: None,
            discoveries: AtomicUsize::new(0),
        }
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MirrorBackend for FakeBackend {
    fn distributor(&self) -> DistributorId {
        self.distributor
    }

    async fn discover_mirrors(&self, _client: &ProbeClient) -> Result<Vec<CandidateMirror>> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.mirrors.iter().map(|m| CandidateMirror::new(m)).collect())
    }

    fn base_mirror(&self) -> &'static str {
        self.base
    }

    fn security_url(&self) -> &'static str {
        self.security
    }

    fn old_releases_url(&self) -> Option<&'static str> {
        self.old_releases
    }

    fn release_probe_url(&self, mirror_url: &str, codename: &str) -> String {
        format!("{}/dists/{}/Release", mirror_url.trim_end_matches('/'), codename)
    }

    fn eol_override(&self, _codename: &str, _architecture: &str) -> Option<NaiveDate> {
        self.eol_override
    }

    fn default_suites(&self) -> &'static [&'static str] {
        &["release", "security"]
    }

    fn valid_suites(&self) -> &'static [&'static str] {
        &["release", "security", "updates"]
    }

    fn valid_components(&self) -> &'static [&'static str] {
        &["main", "universe"]
    }
}
