//! Helpers for provider CLIs.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Resolve `binary` on PATH.
pub fn find_tool(binary: &str) -> ProviderResult<PathBuf> {
    which::which(binary).map_err(|_| ProviderError::ToolNotFound(binary.to_string()))
}

/// Run a tool to completion, failing on timeout or a non-zero exit.
pub async fn run_tool<I, S>(binary: &str, args: I, timeout: Duration) -> ProviderResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = find_tool(binary)?;
    let mut command = tokio::process::Command::new(&program);
    command.args(args).kill_on_drop(true);
    debug!("Running {}", binary);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| {
            ProviderError::tool_failed(binary, format!("timed out after {}s", timeout.as_secs()))
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(ProviderError::tool_failed(
            binary,
            format!("exit code {:?}: {}", output.status.code(), tail.join("\n")),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool() {
        let result = run_tool("vgen-no-such-tool", ["--help"], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProviderError::ToolNotFound(_))));
    }
}
