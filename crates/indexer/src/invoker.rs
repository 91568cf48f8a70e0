use crate::capture::CaptureFileRef;
use crate::{CorpusError, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;

/// Argument template passed to the dissection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// `-Tfields -e frame.protocols -r <file>`: one colon-separated chain per frame.
    ProtocolChain,
    /// `-nxVr <file>`: full verbose dissection.
    FullDissection,
}

impl ToolMode {
    pub fn args(self, file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = match self {
            ToolMode::ProtocolChain => ["-Tfields", "-e", "frame.protocols", "-r"]
                .into_iter()
                .map(OsString::from)
                .collect(),
            ToolMode::FullDissection => vec![OsString::from("-nxVr")],
        };
        args.push(file.as_os_str().to_os_string());
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStatus {
    Exited(i32),
    /// Killed by a signal (crash) before producing an exit code.
    Signalled(Option<i32>),
    SpawnFailed(String),
    TimedOut(Duration),
    Io(String),
}

impl InvocationStatus {
    fn from_exit(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return InvocationStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            InvocationStatus::Signalled(status.signal())
        }
        #[cfg(not(unix))]
        {
            InvocationStatus::Signalled(None)
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, InvocationStatus::Exited(0))
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationStatus::Exited(code) => write!(f, "exit status {code}"),
            InvocationStatus::Signalled(Some(signal)) => write!(f, "killed by signal {signal}"),
            InvocationStatus::Signalled(None) => write!(f, "killed by signal"),
            InvocationStatus::SpawnFailed(reason) => write!(f, "failed to start: {reason}"),
            InvocationStatus::TimedOut(limit) => write!(f, "timed out after {limit:?}"),
            InvocationStatus::Io(reason) => write!(f, "io error: {reason}"),
        }
    }
}

/// Captured result of one engine run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub status: InvocationStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Invocation {
    fn without_output(status: InvocationStatus) -> Self {
        Self {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status.succeeded()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            InvocationStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Status plus the first line of stderr, for logs and failed index entries.
    pub fn failure_summary(&self) -> String {
        let first_line = String::from_utf8_lossy(&self.stderr)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        match first_line {
            Some(line) => format!("{}: {line}", self.status),
            None => self.status.to_string(),
        }
    }
}

/// Engine run whose stdout/stderr went to uniquely named temp files.
///
/// The files are deleted on drop unless [`RetainedOutput::keep`] is called.
#[derive(Debug)]
pub struct RetainedOutput {
    pub status: InvocationStatus,
    pub stdout: NamedTempFile,
    pub stderr: NamedTempFile,
}

impl RetainedOutput {
    pub fn stdout_path(&self) -> &Path {
        self.stdout.path()
    }

    pub fn stderr_path(&self) -> &Path {
        self.stderr.path()
    }

    /// Persist both files and return their paths.
    pub fn keep(self) -> Result<Vec<PathBuf>> {
        let stdout = self
            .stdout
            .into_temp_path()
            .keep()
            .map_err(|err| CorpusError::IoError(err.error))?;
        let stderr = self
            .stderr
            .into_temp_path()
            .keep()
            .map_err(|err| CorpusError::IoError(err.error))?;
        Ok(vec![stdout, stderr])
    }
}

/// External dissection engine invoked once per capture file.
#[derive(Debug, Clone)]
pub struct DissectionEngine {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl DissectionEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Locate `name` inside `binary_dir`, or on `PATH` when no directory is given.
    pub fn resolve(binary_dir: Option<&Path>, name: &str) -> Result<Self> {
        match binary_dir {
            Some(dir) => {
                let candidate = dir.join(name);
                if is_executable(&candidate) {
                    Ok(Self::new(candidate))
                } else {
                    Err(CorpusError::ToolInvocation {
                        binary: candidate,
                        reason: "not found or not executable".to_string(),
                    })
                }
            }
            None => std::env::var_os("PATH")
                .iter()
                .flat_map(std::env::split_paths)
                .map(|dir| dir.join(name))
                .find(|candidate| is_executable(candidate))
                .map(Self::new)
                .ok_or_else(|| CorpusError::ToolInvocation {
                    binary: PathBuf::from(name),
                    reason: "not found on PATH".to_string(),
                }),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|limit| !limit.is_zero());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn command(&self, mode: ToolMode, file: &CaptureFileRef) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(mode.args(file.path()))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Run the engine and capture stdout and stderr in memory.
    ///
    /// Never fails: a missing binary, a nonzero exit or a timeout are all reported in
    /// [`Invocation::status`].
    pub async fn invoke(&self, mode: ToolMode, file: &CaptureFileRef) -> Invocation {
        let mut command = self.command(mode, file);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        self.run_captured(command, file).await
    }

    /// Like [`invoke`](Self::invoke) but discards stdout. Used where only pass/fail matters.
    pub async fn invoke_quiet(&self, mode: ToolMode, file: &CaptureFileRef) -> Invocation {
        let mut command = self.command(mode, file);
        command.stdout(Stdio::null()).stderr(Stdio::piped());
        self.run_captured(command, file).await
    }

    async fn run_captured(&self, mut command: Command, file: &CaptureFileRef) -> Invocation {
        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                log::debug!("Failed to start {}: {err}", self.binary.display());
                return Invocation::without_output(InvocationStatus::SpawnFailed(err.to_string()));
            }
        };

        let output = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(output) => output,
                Err(_) => {
                    // Dropping the future drops the child, which kills it.
                    log::warn!("{file}: dissection timed out after {limit:?}");
                    return Invocation::without_output(InvocationStatus::TimedOut(limit));
                }
            },
            None => output.await,
        };

        match output {
            Ok(output) => Invocation {
                status: InvocationStatus::from_exit(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(err) => Invocation::without_output(InvocationStatus::Io(err.to_string())),
        }
    }

    /// Run the engine with stdout/stderr redirected into fresh temp files under `dir`.
    ///
    /// Names follow `<capture>.<label>.<random>.<stream>`, so concurrent workers never
    /// share a path. Only temp-file creation errors are returned as `Err`.
    pub async fn invoke_retained(
        &self,
        mode: ToolMode,
        file: &CaptureFileRef,
        dir: &Path,
        label: &str,
    ) -> Result<RetainedOutput> {
        let prefix = format!("{}.{label}.", file.file_name_lossy());
        let stdout = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".stdout")
            .tempfile_in(dir)?;
        let stderr = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".stderr")
            .tempfile_in(dir)?;

        let mut command = self.command(mode, file);
        command
            .stdout(Stdio::from(stdout.reopen()?))
            .stderr(Stdio::from(stderr.reopen()?));

        let status = match command.spawn() {
            Ok(mut child) => {
                let waited = match self.timeout {
                    Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                        Ok(waited) => waited,
                        Err(_) => {
                            log::warn!("{file}: {label} dissection timed out after {limit:?}");
                            let _ = child.kill().await;
                            return Ok(RetainedOutput {
                                status: InvocationStatus::TimedOut(limit),
                                stdout,
                                stderr,
                            });
                        }
                    },
                    None => child.wait().await,
                };
                match waited {
                    Ok(status) => InvocationStatus::from_exit(status),
                    Err(err) => InvocationStatus::Io(err.to_string()),
                }
            }
            Err(err) => InvocationStatus::SpawnFailed(err.to_string()),
        };

        Ok(RetainedOutput {
            status,
            stdout,
            stderr,
        })
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn argument_templates() {
        let file = Path::new("/c/a.pcap");
        assert_eq!(
            ToolMode::ProtocolChain.args(file),
            ["-Tfields", "-e", "frame.protocols", "-r", "/c/a.pcap"]
                .map(OsString::from)
                .to_vec()
        );
        assert_eq!(
            ToolMode::FullDissection.args(file),
            ["-nxVr", "/c/a.pcap"].map(OsString::from).to_vec()
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_invocation() {
        let temp = tempdir().unwrap();
        let engine = DissectionEngine::new(temp.path().join("no-such-engine"));
        let file = CaptureFileRef::new(temp.path().join("a.pcap")).unwrap();

        let invocation = engine.invoke(ToolMode::ProtocolChain, &file).await;

        assert!(matches!(invocation.status, InvocationStatus::SpawnFailed(_)));
        assert!(!invocation.succeeded());
    }

    #[tokio::test]
    async fn nonzero_exit_is_captured_with_stderr() {
        let temp = tempdir().unwrap();
        let binary = script(temp.path(), "engine", "echo 'bad capture' >&2\nexit 2");
        let engine = DissectionEngine::new(binary);
        let file = CaptureFileRef::new(temp.path().join("a.pcap")).unwrap();

        let invocation = engine.invoke(ToolMode::ProtocolChain, &file).await;

        assert_eq!(invocation.exit_code(), Some(2));
        assert_eq!(invocation.failure_summary(), "exit status 2: bad capture");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let temp = tempdir().unwrap();
        let binary = script(temp.path(), "engine", "sleep 30");
        let engine =
            DissectionEngine::new(binary).with_timeout(Some(Duration::from_millis(200)));
        let file = CaptureFileRef::new(temp.path().join("a.pcap")).unwrap();

        let started = std::time::Instant::now();
        let invocation = engine.invoke(ToolMode::FullDissection, &file).await;

        assert!(matches!(invocation.status, InvocationStatus::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retained_outputs_get_unique_paths() {
        let temp = tempdir().unwrap();
        let out_dir = temp.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        let binary = script(temp.path(), "engine", "echo \"frame of $2\"\necho warn >&2");
        let engine = DissectionEngine::new(binary);
        let file = CaptureFileRef::new(temp.path().join("a.pcap")).unwrap();

        let first = engine
            .invoke_retained(ToolMode::FullDissection, &file, &out_dir, "baseline")
            .await
            .unwrap();
        let second = engine
            .invoke_retained(ToolMode::FullDissection, &file, &out_dir, "baseline")
            .await
            .unwrap();

        assert!(first.status.succeeded());
        assert_ne!(first.stdout_path(), second.stdout_path());
        let stdout = std::fs::read_to_string(first.stdout_path()).unwrap();
        assert_eq!(stdout, format!("frame of {}\n", file.path().display()));

        let kept = first.keep().unwrap();
        drop(second);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|path| path.exists()));
        assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 2);
    }

    #[test]
    fn resolve_requires_an_executable() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("plain"), b"").unwrap();
        script(temp.path(), "tshark", "exit 0");

        assert!(DissectionEngine::resolve(Some(temp.path()), "tshark").is_ok());
        assert!(matches!(
            DissectionEngine::resolve(Some(temp.path()), "plain"),
            Err(CorpusError::ToolInvocation { .. })
        ));
        assert!(DissectionEngine::resolve(Some(temp.path()), "missing").is_err());
    }
}
