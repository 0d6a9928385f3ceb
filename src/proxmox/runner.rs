//! Process execution behind a trait so command builders can be tested

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use super::CommandOutput;
use crate::{Error, Result};

/// Runs one host program to completion.
///
/// Spawn failures map to [`Error::HypervisorUnavailable`], an exceeded
/// deadline to [`Error::Timeout`]. A non-zero exit is not an error here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput>;
}

/// Production runner on `tokio::process`; kills the child on timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        // args may carry the root password, only the subcommand is logged
        tracing::debug!(
            program,
            subcommand = args.first().map(String::as_str).unwrap_or(""),
            timeout_secs = timeout.as_secs(),
            "Running host command"
        );

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::HypervisorUnavailable(format!("failed to spawn {}: {}", program, e)))?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                let status = status.map_err(|e| {
                    Error::HypervisorUnavailable(format!("waiting for {}: {}", program, e))
                })?;
                Ok(CommandOutput {
                    code: status.code(),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                })
            } => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                tracing::warn!(program, timeout_secs = timeout.as_secs(), "Host command timed out");
                Err(Error::Timeout {
                    program: program.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}
