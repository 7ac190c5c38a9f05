use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::{io::AsyncWriteExt as _, process::Command};

/// What a finished child process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait]
pub trait CheckCommandOutput {
    /// Runs the command with optional stdin content and returns whatever exit code it had.
    async fn run_collect(&mut self, input_bytes: Option<&[u8]>) -> Result<RawOutput>;
}

#[async_trait]
impl CheckCommandOutput for Command {
    async fn run_collect(&mut self, input_bytes: Option<&[u8]>) -> Result<RawOutput> {
        // reset all locale settings for this command
        self.env("LC_ALL", "C");

        tracing::trace!(cmd=?self.as_std(), "run external cmd");

        let output = async {
            if input_bytes.is_some() {
                self.stdin(Stdio::piped());
            } else {
                self.stdin(Stdio::null());
            }
            self.stdout(Stdio::piped());
            self.stderr(Stdio::piped());

            let mut child = self.kill_on_drop(true).spawn()?;

            if let Some(input_bytes) = input_bytes {
                let mut stdin = child.stdin.take().context("No stdin")?;
                stdin.write_all(input_bytes).await?;
                stdin.shutdown().await?;
            }

            child.wait_with_output().await.map_err(anyhow::Error::from)
        }
        .await
        .with_context(|| format!("Failed to execute external command: {:?}", self.as_std()))?;

        let code = output
            .status
            .code()
            .ok_or_else(|| anyhow!("cmd {:?} killed by signal", self.as_std()))?;

        Ok(RawOutput {
            code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
