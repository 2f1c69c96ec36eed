//! External command execution.

use std::ffi::OsStr;
use std::process::{Output, Stdio};

use phoneboot_common::{BootError, BootResult};
use tokio::process::Command;

/// Run a command to completion and capture its output.
///
/// A non-zero exit is not an error here. Callers decide what it means.
pub async fn run<I, S>(program: &str, args: I) -> BootResult<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BootError::Internal {
            message: format!("Failed to execute {program}: {e}"),
        })
}

/// Trimmed stderr of a finished command.
pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}
