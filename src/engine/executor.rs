//! Engine child-process execution.

use crate::engine::invocation::Invocation;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Runner for the external engine executable.
///
/// One invocation per granule, blocking from the orchestrator's point of
/// view; the engine claims exclusive use of the scratch space under the
/// working directory, so invocations never overlap within one batch.
pub struct Executor {
    executable: PathBuf,
}

impl Executor {
    /// Create an executor around the engine executable.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Run the engine against one task descriptor.
    ///
    /// The descriptor path is the sole argument; the working directory and
    /// ancillary subdirectory are injected through the environment and the
    /// child's current directory is the working directory. Returns the
    /// child's process id for log correlation. A spawn failure or abnormal
    /// termination is a per-granule failure; the caller continues with the
    /// rest of the batch.
    pub async fn run(
        &self,
        work_dir: &Path,
        anc_subdir: &str,
        invocation: &Invocation,
    ) -> Result<u32, PipelineError> {
        tracing::info!(
            "Executing {} {} in {}",
            self.executable.display(),
            invocation.descriptor_path.display(),
            work_dir.display()
        );

        let mut child = Command::new(&self.executable)
            .arg(&invocation.descriptor_path)
            .env("WORK_DIR", work_dir)
            .env("LINKED_ANCILLARY", anc_subdir)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::ProcessExecution {
                granule_id: invocation.granule_id.clone(),
                reason: format!("failed to spawn engine: {}", e),
            })?;

        let pid = child.id().unwrap_or(0);
        tracing::debug!("Engine running as pid {}", pid);

        let status = child
            .wait()
            .await
            .map_err(|e| PipelineError::ProcessExecution {
                granule_id: invocation.granule_id.clone(),
                reason: format!("failed to wait for engine: {}", e),
            })?;

        if !status.success() {
            return Err(PipelineError::ProcessExecution {
                granule_id: invocation.granule_id.clone(),
                reason: format!("engine terminated with {}", status),
            });
        }

        Ok(pid)
    }
}
