use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::command::{invoke, CommandRunner};
use crate::error::ProvisioningError;

/// Removes machines from the cluster. The outcome of the command is
/// reported as-is; nothing checks that the node is really gone.
#[derive(Clone)]
pub struct NodeLifecycleManager {
    kubectl: PathBuf,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl NodeLifecycleManager {
    pub fn new(bin_dir: &Path, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            kubectl: bin_dir.join("kubectl"),
            runner,
            timeout,
        }
    }

    pub async fn delete(&self, hostname: &str) -> Result<(), ProvisioningError> {
        let args = ["delete", "node", hostname].map(str::to_string);
        let output = invoke(self.runner.as_ref(), &self.kubectl, &args, self.timeout).await?;
        info!(
            hostname,
            output = %String::from_utf8_lossy(&output).trim(),
            "deleted node"
        );
        Ok(())
    }
}
