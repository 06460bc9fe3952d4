use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::error::ProvisioningError;

/// Runs an external program and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> anyhow::Result<Vec<u8>>;
}

/// Spawns real child processes. The child is killed if the request that
/// started it is dropped.
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &Path, args: &[String]) -> anyhow::Result<Vec<u8>> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawn {}", program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{}: {}", output.status, stderr.trim());
        }
        Ok(output.stdout)
    }
}

/// Run `program` under `timeout`, folding every failure into a
/// [`ProvisioningError`].
pub async fn invoke(
    runner: &dyn CommandRunner,
    program: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<Vec<u8>, ProvisioningError> {
    match tokio::time::timeout(timeout, runner.run(program, args)).await {
        Ok(Ok(stdout)) => Ok(stdout),
        Ok(Err(err)) => Err(ProvisioningError::CommandFailure {
            program: program.display().to_string(),
            detail: format!("{err:#}"),
        }),
        Err(_) => Err(ProvisioningError::Timeout {
            operation: "external command",
            timeout,
        }),
    }
}
