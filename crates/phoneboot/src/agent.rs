//! SIP agent handoff.

use std::os::unix::process::CommandExt;
use std::process::Command;

use phoneboot_common::{BootError, BootResult};

/// Agent command line used when none is given.
pub const DEFAULT_AGENT: [&str; 2] = ["pjsua", "--null-audio"];

/// Transfers control to the SIP agent.
pub trait AgentLauncher: Send + Sync {
    /// Command line for logs and reports.
    fn describe(&self) -> String;

    /// Hand the process over to the agent.
    ///
    /// Launchers that replace the current process only return on failure.
    /// `Ok` means the agent owns the call plane from now on.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Internal`] when the agent could not be started.
    fn handoff(&self) -> BootResult<()>;
}

/// Replaces the bootstrap process with the agent.
#[derive(Debug, Clone)]
pub struct ExecAgent {
    argv: Vec<String>,
}

impl ExecAgent {
    /// Create a launcher for `argv`, falling back to [`DEFAULT_AGENT`] when
    /// it is empty.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        let argv = if argv.is_empty() {
            DEFAULT_AGENT.iter().map(ToString::to_string).collect()
        } else {
            argv
        };
        Self { argv }
    }

    /// The command line.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl AgentLauncher for ExecAgent {
    fn describe(&self) -> String {
        self.argv.join(" ")
    }

    fn handoff(&self) -> BootResult<()> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(BootError::Internal {
                message: "empty agent command line".to_string(),
            });
        };

        tracing::info!(agent = %self.describe(), "Handing off to SIP agent");
        let err = Command::new(program).args(args).exec();

        Err(BootError::Internal {
            message: format!("failed to exec {program}: {err}"),
        })
    }
}
