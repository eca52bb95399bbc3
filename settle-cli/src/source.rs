//! Status sources the CLI can poll
//!
//! Both sources hand back the raw text they read as the snapshot object and
//! derive the state label from it. Invalid UTF-8 is decoded lossily.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use settle_core::duration::format_duration;
use settle_core::refresh::{BoxFuture, Refresh, RefreshError, RefreshResult, Snapshot};
use tokio::process::Command;

/// Turns probe output into a state label
#[derive(Debug, Clone, Default)]
pub struct StateExtractor {
    pattern: Option<Regex>,
}

impl StateExtractor {
    /// `pattern` picks the state out of the output: capture group 1 if the
    /// pattern has one, otherwise the whole match
    pub fn new(pattern: Option<&str>) -> Result<Self, String> {
        let pattern = pattern
            .map(|p| Regex::new(p).map_err(|e| format!("Invalid --extract pattern: {}", e)))
            .transpose()?;
        Ok(Self { pattern })
    }

    pub fn extract(&self, text: &str) -> Result<String, RefreshError> {
        let Some(pattern) = &self.pattern else {
            return Ok(text.trim().to_string());
        };

        let captures = pattern.captures(text).ok_or_else(|| {
            RefreshError::failed(format!("pattern {:?} did not match the output", pattern.as_str()))
        })?;
        let state = captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        Ok(state)
    }
}

/// Runs a shell command; its stdout is the resource, the extracted text its state
#[derive(Debug)]
pub struct CommandSource {
    command: String,
    extractor: StateExtractor,
    probe_timeout: Duration,
    not_found_exit_code: Option<i32>,
}

impl CommandSource {
    pub fn new(command: impl Into<String>, extractor: StateExtractor) -> Self {
        Self {
            command: command.into(),
            extractor,
            probe_timeout: Duration::from_secs(30),
            not_found_exit_code: None,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Treat this exit code as "resource not found"
    pub fn with_not_found_exit_code(mut self, code: Option<i32>) -> Self {
        self.not_found_exit_code = code;
        self
    }

    fn shell(&self) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn probe(&self) -> RefreshResult<String> {
        let output = tokio::time::timeout(self.probe_timeout, self.shell().output())
            .await
            .map_err(|_| {
                RefreshError::failed(format!(
                    "command {:?} did not finish within {}",
                    self.command,
                    format_duration(self.probe_timeout)
                ))
            })?
            .map_err(|e| {
                RefreshError::failed(format!("Failed to run {:?}", self.command)).with_cause(e)
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let code = output.status.code();
            if code.is_some() && code == self.not_found_exit_code {
                return Err(RefreshError::not_found(format!(
                    "command {:?} exited with {}",
                    self.command, output.status
                )));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RefreshError::failed(format!(
                "command {:?} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let state = self.extractor.extract(&stdout)?;
        Ok(Snapshot::new(stdout, state))
    }
}

impl Refresh for CommandSource {
    type Object = String;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<String>> {
        Box::pin(self.probe())
    }
}

/// Reads a status file; a missing file means the resource is not found
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    extractor: StateExtractor,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, extractor: StateExtractor) -> Self {
        Self {
            path: path.into(),
            extractor,
        }
    }

    async fn probe(&self) -> RefreshResult<String> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RefreshError::not_found(self.path.display().to_string()));
            }
            Err(e) => {
                return Err(RefreshError::failed(format!(
                    "Failed to read {}",
                    self.path.display()
                ))
                .with_cause(e));
            }
        };

        let state = self.extractor.extract(&content)?;
        Ok(Snapshot::new(content, state))
    }
}

impl Refresh for FileSource {
    type Object = String;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<String>> {
        Box::pin(self.probe())
    }
}

/// Counts probes so reports can show them even when polling failed
pub struct CountingSource<R> {
    inner: R,
    polls: u32,
}

impl<R: Refresh> CountingSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            polls: 0,
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl<R: Refresh> Refresh for CountingSource<R> {
    type Object = R::Object;

    fn refresh(&mut self) -> BoxFuture<'_, RefreshResult<Self::Object>> {
        self.polls += 1;
        self.inner.refresh()
    }
}
