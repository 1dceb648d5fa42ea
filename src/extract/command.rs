//! Running external extraction tools.
//!
//! Every backend goes through [`CommandRunner`]: stdout is captured,
//! stderr is discarded, and the child is killed if it outlives the
//! configured timeout.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, ThumbnailError};

/// Default wall-clock limit for one tool invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program` and return its stdout.
    ///
    /// A non-zero exit is [`ThumbnailError::ExtractionFailed`]; a clean exit
    /// with nothing on stdout is [`ThumbnailError::EmptyPayload`], since
    /// some tools exit 0 after silently failing to match a misdetected
    /// image.
    pub async fn capture<I, S>(&self, program: &Path, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = self.run(program, args).await?;
        if stdout.is_empty() {
            return Err(ThumbnailError::EmptyPayload(tool_name(program)));
        }
        Ok(stdout)
    }

    /// Run `program` to completion, returning whatever it wrote to stdout.
    ///
    /// Used when the tool's real output lands on disk and an empty stdout
    /// is expected.
    pub async fn run<I, S>(&self, program: &Path, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let tool = tool_name(program);
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!("running {:?}", command.as_std());

        let child = command.spawn().map_err(|e| ThumbnailError::ExtractionFailed {
            tool: tool.clone(),
            reason: format!("failed to start: {e}"),
        })?;

        // dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ThumbnailError::ToolTimedOut {
                    tool,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            debug!("{tool} exited with {}", output.status);
            return Err(ThumbnailError::ExtractionFailed {
                tool,
                reason: format!("exited with {}", output.status),
            });
        }

        debug!("{tool} succeeded, captured {} bytes", output.stdout.len());
        Ok(output.stdout)
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .into_owned()
}
