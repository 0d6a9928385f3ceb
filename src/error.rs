//! Error types for pve-deploy

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::models::{GuestId, Stage};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown framework: {0}")]
    UnknownFramework(String),

    #[error("Repository URL required")]
    MissingRepository,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No guest ID available in range {start}-{end}")]
    IdentityExhausted { start: GuestId, end: GuestId },

    #[error("No IP address available in range {first}-{last}")]
    AddressExhausted { first: Ipv4Addr, last: Ipv4Addr },

    #[error("{stage} stage failed: {message}")]
    Provisioning {
        stage: Stage,
        message: String,
        output: String,
    },

    #[error("{action} failed: {output}")]
    Command { action: String, output: String },

    #[error("Hypervisor unavailable: {0}")]
    HypervisorUnavailable(String),

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("Malformed description tag {tag:?}: {reason}")]
    MalformedTag { tag: String, reason: String },

    #[error("Guest not found: {0}")]
    GuestNotFound(GuestId),

    #[error("Deployment cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error class reported to API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Capacity,
    Provisioning,
    HypervisorUnavailable,
    NotFound,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownFramework(_) | Error::MissingRepository | Error::Validation(_) => {
                ErrorKind::Validation
            }
            Error::IdentityExhausted { .. } | Error::AddressExhausted { .. } => ErrorKind::Capacity,
            Error::Provisioning { .. } => ErrorKind::Provisioning,
            Error::HypervisorUnavailable(_) | Error::Timeout { .. } => {
                ErrorKind::HypervisorUnavailable
            }
            Error::GuestNotFound(_) => ErrorKind::NotFound,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Command { .. }
            | Error::MalformedTag { .. }
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a capacity error (range exhausted)
    pub fn is_capacity_error(&self) -> bool {
        self.kind() == ErrorKind::Capacity
    }

    /// Stage a provisioning error was raised in
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Provisioning { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Raw command output attached for diagnostics
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::Provisioning { output, .. } | Error::Command { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }

    /// Replace every occurrence of `secret` in the messages carried by this error
    pub fn redact(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        let scrub = |s: String| s.replace(secret, "********");
        match self {
            Error::Provisioning { stage, message, output } => Error::Provisioning {
                stage,
                message: scrub(message),
                output: scrub(output),
            },
            Error::Command { action, output } => Error::Command {
                action,
                output: scrub(output),
            },
            Error::HypervisorUnavailable(msg) => Error::HypervisorUnavailable(scrub(msg)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::UnknownFramework("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::MissingRepository.kind(), ErrorKind::Validation);
        assert!(Error::IdentityExhausted { start: 300, end: 399 }.is_capacity_error());
        assert_eq!(
            Error::Timeout { program: "pct".into(), secs: 30 }.kind(),
            ErrorKind::HypervisorUnavailable
        );
        assert_eq!(Error::GuestNotFound(300).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unknown_framework_echoes_key() {
        let err = Error::UnknownFramework("unknown-fw".into());
        assert_eq!(err.to_string(), "Unknown framework: unknown-fw");
    }

    #[test]
    fn test_provisioning_stage_and_output() {
        let err = Error::Provisioning {
            stage: Stage::Install,
            message: "exited with status 100".into(),
            output: "E: Unable to locate package".into(),
        };
        assert_eq!(err.stage(), Some(Stage::Install));
        assert_eq!(err.output(), Some("E: Unable to locate package"));
        assert_eq!(err.to_string(), "Install stage failed: exited with status 100");
    }

    #[test]
    fn test_redact() {
        let err = Error::Provisioning {
            stage: Stage::Create,
            message: "bad password hunter2-abc".into(),
            output: "--password hunter2-abc".into(),
        }
        .redact("hunter2-abc");

        assert!(!err.to_string().contains("hunter2-abc"));
        assert_eq!(err.output(), Some("--password ********"));
    }
}
