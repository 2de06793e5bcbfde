//! Where commands run and files live: the local host or a chroot

use crate::utils::fs::atomic_write;
use crate::{AptPilotError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Exit status and interleaved stdout/stderr of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// File and process access for one system. Paths are absolute paths as seen
/// from inside that system.
#[async_trait]
pub trait SystemContext: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Replace a file atomically
    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> bool;

    /// Names of the entries in a directory, empty if it doesn't exist
    async fn list_dir(&self, path: &str) -> Result<Vec<String>>;

    /// Run a program to completion. A non-zero exit is reported through
    /// [`CommandOutput::success`], not as an error.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    fn describe(&self) -> String;
}

async fn run_command(mut command: Command, command_line: &str) -> Result<CommandOutput> {
    debug!("Executing: {}", command_line);
    let output = command
        .output()
        .await
        .map_err(|e| AptPilotError::Command(format!("Failed to run {}: {}", command_line, e)))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        debug!("{} exited with {}", command_line, output.status);
    }
    Ok(CommandOutput {
        success: output.status.success(),
        output: text,
    })
}

async fn list_entries(path: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// The machine aptpilot runs on
#[derive(Debug, Clone, Default)]
pub struct LocalContext;

#[async_trait]
impl SystemContext for LocalContext {
    async fn read_file(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        atomic_write(Path::new(path), contents.as_bytes()).await
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        list_entries(Path::new(path)).await
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args);
        run_command(command, &format!("{} {}", program, args.join(" "))).await
    }

    fn describe(&self) -> String {
        "local system".to_string()
    }
}

/// A root filesystem entered with `chroot(8)`
#[derive(Debug, Clone)]
pub struct ChrootContext {
    root: PathBuf,
}

impl ChrootContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Host path of `path` inside the chroot
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl SystemContext for ChrootContext {
    async fn read_file(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.host_path(path)).await?)
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        atomic_write(&self.host_path(path), contents.as_bytes()).await
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.host_path(path)).await.unwrap_or(false)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        list_entries(&self.host_path(path)).await
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut command = Command::new("chroot");
        command.arg(&self.root).arg(program).args(args).env("LC_ALL", "C");
        run_command(
            command,
            &format!("chroot {} {} {}", self.root.display(), program, args.join(" ")),
        )
        .await
    }

    fn describe(&self) -> String {
        format!("chroot {}", self.root.display())
    }
}

/// Debian architecture name of the context (e.g. `amd64`)
pub async fn detect_architecture(context: &dyn SystemContext) -> String {
    match context.run("dpkg", &["--print-architecture"]).await {
        Ok(output) if output.success && !output.output.trim().is_empty() => output.output.trim().to_string(),
        _ => match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "x86" => "i386",
            "aarch64" => "arm64",
            "arm" => "armhf",
            "powerpc64" => "ppc64el",
            other => other,
        }
        .to_string(),
    }
}
