// src/utils/streams.rs
use std::process::{ExitStatus, Stdio};

use anyhow::{anyhow, Result};
use futures::try_join;
use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::config::defs::PipelineError;

/// Lines of stderr quoted back in a tool failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Captured result of one external tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ToolOutput {
    fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL_LINES);
        self.stderr[start..].join("\n")
    }
}


/// Reads an async pipe to the end, line by line.
async fn collect_lines<R>(reader: R) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LinesStream::new(BufReader::new(reader).lines());
    let mut out = Vec::new();
    while let Some(line) = lines.next().await {
        out.push(line?);
    }
    Ok(out)
}


/// Spawns an external tool and waits for it, draining stdout and stderr concurrently
/// so neither pipe can fill up and stall the child.
/// The child is killed if the returned future is dropped before completion.
///
/// # Arguments
///
/// * `tool` - Tag used in logs and errors.
/// * `program` - Executable name or path.
/// * `args` - Command-line arguments.
///
/// # Returns
/// ToolOutput with captured lines; ExternalTool error on spawn failure or non-zero exit.
pub async fn spawn_and_wait(tool: &str, program: &str, args: &[String]) -> Result<ToolOutput, PipelineError> {
    debug!("Running: {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::ExternalTool {
            tool: tool.to_string(),
            error: format!("Failed to spawn {}: {}. Is {} installed?", program, e, tool),
        })?;

    let tool_error = |e: anyhow::Error| PipelineError::ExternalTool {
        tool: tool.to_string(),
        error: e.to_string(),
    };

    let stdout = child.stdout.take().ok_or_else(|| tool_error(anyhow!("Failed to get stdout from {}", tool)))?;
    let stderr = child.stderr.take().ok_or_else(|| tool_error(anyhow!("Failed to get stderr from {}", tool)))?;

    let (stdout, stderr, status) = try_join!(
        collect_lines(stdout),
        collect_lines(stderr),
        async { child.wait().await.map_err(anyhow::Error::from) },
    )
        .map_err(tool_error)?;

    let output = ToolOutput { status, stdout, stderr };
    for line in &output.stderr {
        debug!("[{}] {}", tool, line);
    }

    if !output.status.success() {
        return Err(PipelineError::ExternalTool {
            tool: tool.to_string(),
            error: format!("exited with {}\n{}", output.status, output.stderr_tail()),
        });
    }
    Ok(output)
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_wait_captures_both_streams() -> Result<()> {
        let args = vec!["-c".to_string(), "echo out; echo err 1>&2".to_string()];
        let output = spawn_and_wait("sh", "sh", &args).await?;
        assert_eq!(output.stdout, ["out".to_string()]);
        assert_eq!(output.stderr, ["err".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_spawn_and_wait_non_zero_exit() {
        let args = vec!["-c".to_string(), "echo 'out of memory' 1>&2; exit 3".to_string()];
        match spawn_and_wait("sh", "sh", &args).await {
            Err(PipelineError::ExternalTool { tool, error }) => {
                assert_eq!(tool, "sh");
                assert!(error.contains("out of memory"));
            }
            other => panic!("expected ExternalTool error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_and_wait_missing_program() {
        let result = spawn_and_wait("ghost", "/nonexistent/ghost-tool", &[]).await;
        assert!(matches!(result, Err(PipelineError::ExternalTool { .. })));
    }
}
