//! Error types for qbd attachment operations.
//!
//! Every fallible operation in `libqbd` returns [`QbdError`].  The enum keeps
//! "the tool failed" ([`QbdError::ExternalCommand`]) apart from "the tool's
//! state is inconsistent" ([`QbdError::DuplicateAttachment`]); "not attached"
//! is never an error and is expressed as `Ok(None)` by the reconciler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AttachmentRecord;

/// Unified error type for qbd operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum QbdError {
    /// The caller supplied an empty pool/volume name or an unknown protocol.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An external command could not be launched, exited non-zero, or timed out.
    #[error("command `{command}` failed: {reason}")]
    ExternalCommand {
        /// Rendered command line that was executed.
        command: String,
        /// Exit status and diagnostic output of the failed command.
        reason: String,
    },

    /// More than one attachment matches the same pool/volume identity.
    #[error(
        "found {} attachments for volume {pool}/{volume} [{}]",
        .matches.len(),
        devices(.matches)
    )]
    DuplicateAttachment {
        /// Pool the caller asked about.
        pool: String,
        /// Volume the caller asked about.
        volume: String,
        /// Every record that resolved to the identity.
        matches: Vec<AttachmentRecord>,
    },

    /// A map request succeeded but the device could not be confirmed.
    #[error("attachment not confirmed: {0}")]
    AttachmentNotConfirmed(String),

    /// A configuration value could not be interpreted.
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn devices(matches: &[AttachmentRecord]) -> String {
    matches
        .iter()
        .map(|m| m.device.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl QbdError {
    /// Create a [`QbdError::InvalidArgument`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid_argument<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create a [`QbdError::ExternalCommand`] for `command`.
    pub fn command<C: std::fmt::Display, E: std::fmt::Display>(command: C, reason: E) -> Self {
        Self::ExternalCommand {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a [`QbdError::Config`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(device: &str) -> AttachmentRecord {
        AttachmentRecord {
            id: "1".into(),
            name: "vol".into(),
            pool: "kube".into(),
            device: device.into(),
            ..Default::default()
        }
    }

    #[test]
    fn error_display() {
        let err = QbdError::InvalidArgument("pool name is empty".into());
        assert_eq!(err.to_string(), "invalid argument: pool name is empty");

        let err = QbdError::command("qbd -l -c /etc/neonsan/qbd.conf", "exit code 1");
        assert_eq!(
            err.to_string(),
            "command `qbd -l -c /etc/neonsan/qbd.conf` failed: exit code 1"
        );
    }

    #[test]
    fn duplicate_lists_devices() {
        let err = QbdError::DuplicateAttachment {
            pool: "kube".into(),
            volume: "vol".into(),
            matches: vec![record("/dev/qbd0"), record("/dev/qbd1")],
        };
        assert_eq!(
            err.to_string(),
            "found 2 attachments for volume kube/vol [/dev/qbd0, /dev/qbd1]"
        );
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = QbdError::DuplicateAttachment {
            pool: "kube".into(),
            volume: "vol".into(),
            matches: vec![record("/dev/qbd0"), record("/dev/qbd1")],
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let de: QbdError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
    }
}
