//! Helpers for invoking external CLI tools.

use std::{future::Future, process::Output, time::Duration};

use crate::prelude::*;

/// Await a subprocess with a hard deadline.
///
/// A tool that never finishes would otherwise stall its worker loop forever
/// while the claimed document sits unreachable in an in-progress status, so
/// expiry is converted into a normal error the caller records on the job.
/// Commands passed here should set `kill_on_drop` so the child does not
/// outlive the timeout.
pub async fn output_with_timeout<F>(
    command_name: &str,
    timeout: Duration,
    output: F,
) -> Result<Output>
where
    F: Future<Output = std::io::Result<Output>>,
{
    match tokio::time::timeout(timeout, output).await {
        Ok(output) => output.with_context(|| format!("cannot run {command_name}")),
        Err(_) => Err(anyhow!(
            "{} did not finish within {}s",
            command_name,
            timeout.as_secs()
        )),
    }
}

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged at debug level. Standard
/// error may optionally be screened line by line, since some poppler tools
/// exit 0 while still printing errors.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    error_line_filter: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        command_name = command_name,
        stdout = %stdout,
        stderr = %stderr,
        "Output from command"
    );

    if output.status.success() {
        if let Some(filter) = error_line_filter {
            if stderr.lines().any(filter) {
                return Err(anyhow!(
                    "{} printed error output:\n{}",
                    command_name,
                    stderr,
                ));
            }
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}
