//! Bootstrap states and outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a bootstrap was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Interface roles could not be established.
    ClassificationFailed,
    /// Isolation failed on an essential interface.
    IsolationFailed,
    /// No IPv4 lease on the call interface.
    NoIpv4,
    /// Anything else, including a failed agent handoff.
    Internal,
}

impl AbortReason {
    /// Process exit code for this reason.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::ClassificationFailed => 3,
            Self::IsolationFailed => 4,
            Self::NoIpv4 => 5,
            Self::Internal => 70,
        }
    }

    /// Stable name used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClassificationFailed => "classification_failed",
            Self::IsolationFailed => "isolation_failed",
            Self::NoIpv4 => "no_ipv4",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bootstrap state machine.
///
/// ```text
/// Start -> Classifying -> Isolating -> Leasing -> AdminUp -> AgentHandoff -> Ready
///   \___________\____________\___________\__________\____________\-> Aborted(reason)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootState {
    /// Nothing done yet.
    Start,
    /// Looking for the management and call interfaces.
    Classifying,
    /// Separating the management plane from the call plane.
    Isolating,
    /// Requesting leases on the call interface.
    Leasing,
    /// Starting the administrative access service.
    AdminUp,
    /// Handing the process over to the SIP agent.
    AgentHandoff,
    /// The agent owns the process.
    Ready,
    /// The bootstrap gave up.
    Aborted(AbortReason),
}

impl BootState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Aborted(_))
    }

    /// The state following this one on success.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::Classifying),
            Self::Classifying => Some(Self::Isolating),
            Self::Isolating => Some(Self::Leasing),
            Self::Leasing => Some(Self::AdminUp),
            Self::AdminUp => Some(Self::AgentHandoff),
            Self::AgentHandoff => Some(Self::Ready),
            Self::Ready | Self::Aborted(_) => None,
        }
    }

    /// Whether `next` is a legal transition from this state.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(next, Self::Aborted(_)) || self.successor() == Some(next)
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Classifying => write!(f, "classifying"),
            Self::Isolating => write!(f, "isolating"),
            Self::Leasing => write!(f, "leasing"),
            Self::AdminUp => write!(f, "admin_up"),
            Self::AgentHandoff => write!(f, "agent_handoff"),
            Self::Ready => write!(f, "ready"),
            Self::Aborted(reason) => write!(f, "aborted({reason})"),
        }
    }
}

/// Terminal record of a bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// The agent may start.
    Ready,
    /// The bootstrap was abandoned.
    Aborted {
        /// Category of the failure.
        reason: AbortReason,
        /// The error that caused it.
        detail: String,
    },
}

impl BootstrapOutcome {
    /// Process exit code, zero only for [`BootstrapOutcome::Ready`].
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Aborted { reason, .. } => reason.exit_code(),
        }
    }

    /// The abort reason, if any.
    #[must_use]
    pub const fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Ready => None,
            Self::Aborted { reason, .. } => Some(*reason),
        }
    }

    /// Whether the bootstrap succeeded.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}
