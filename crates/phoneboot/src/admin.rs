//! Administrative access service.
//!
//! SSH runs inside the management VRF so that operators keep reaching the
//! container through the Docker network after the call plane owns the main
//! routing table.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use phoneboot_common::{BootError, BootResult};
use tokio::process::Command;

/// Socket state of a listening TCP socket in `/proc/net/tcp`.
const TCP_LISTEN: &str = "0A";

/// An administrative access service.
#[async_trait]
pub trait AdminService: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Launch the service.
    async fn start(&self) -> BootResult<()>;

    /// Whether the service accepts connections.
    async fn is_listening(&self) -> BootResult<bool>;
}

/// OpenSSH daemon started in the management VRF.
#[derive(Debug, Clone)]
pub struct SshService {
    binary: PathBuf,
    vrf: String,
    port: u16,
    proc_net: PathBuf,
}

impl SshService {
    /// Create the service.
    pub fn new(binary: impl Into<PathBuf>, vrf: impl Into<String>, port: u16) -> Self {
        Self {
            binary: binary.into(),
            vrf: vrf.into(),
            port,
            proc_net: PathBuf::from("/proc/net"),
        }
    }

    /// Read socket tables from another directory.
    #[must_use]
    pub fn with_proc_net(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_net = path.into();
        self
    }
}

#[async_trait]
impl AdminService for SshService {
    fn name(&self) -> &str {
        "sshd"
    }

    async fn start(&self) -> BootResult<()> {
        tracing::debug!(binary = %self.binary.display(), vrf = %self.vrf, "Starting sshd");

        // sshd detaches by itself, the status is that of the parent.
        let output = Command::new("ip")
            .args(["vrf", "exec", self.vrf.as_str()])
            .arg(&self.binary)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BootError::AdminService {
                message: format!("failed to run {}: {e}", self.binary.display()),
            })?;

        if !output.status.success() {
            return Err(BootError::AdminService {
                message: format!(
                    "{} exited with {}: {}",
                    self.binary.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    async fn is_listening(&self) -> BootResult<bool> {
        listening_on(&self.proc_net, self.port)
    }
}

/// Whether any socket in `tcp` or `tcp6` under `proc_net` listens on `port`.
///
/// # Errors
///
/// Returns an error only when neither table can be read.
pub fn listening_on(proc_net: &Path, port: u16) -> BootResult<bool> {
    let mut readable = false;
    for table in ["tcp", "tcp6"] {
        match std::fs::read_to_string(proc_net.join(table)) {
            Ok(content) => {
                readable = true;
                if table_has_listener(&content, port) {
                    return Ok(true);
                }
            }
            Err(e) => tracing::debug!(table, error = %e, "Socket table unavailable"),
        }
    }

    if readable {
        Ok(false)
    } else {
        Err(BootError::AdminService {
            message: format!("cannot read socket tables under {}", proc_net.display()),
        })
    }
}

/// Whether a `/proc/net/tcp` style table has a LISTEN socket on `port`.
#[must_use]
pub fn table_has_listener(content: &str, port: u16) -> bool {
    content.lines().skip(1).any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(local), Some(state)) = (fields.get(1), fields.get(3)) else {
            return false;
        };
        let local_port = local
            .rsplit_once(':')
            .and_then(|(_, p)| u16::from_str_radix(p, 16).ok());
        local_port == Some(port) && *state == TCP_LISTEN
    })
}

/// Poll `service` until it listens or `timeout` elapses.
///
/// # Errors
///
/// Returns [`BootError::AdminService`] when the deadline passes first.
pub async fn wait_until_listening(
    service: &dyn AdminService,
    timeout: Duration,
    interval: Duration,
) -> BootResult<()> {
    let poll = async {
        loop {
            match service.is_listening().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => tracing::debug!(service = service.name(), error = %e, "Readiness probe failed"),
            }
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| BootError::AdminService {
            message: format!(
                "{} not listening after {}s",
                service.name(),
                timeout.as_secs()
            ),
        })
}
