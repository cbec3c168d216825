//! Core qbd types: attachment records, transport protocol, and argument
//! validation shared by the driver and the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QbdError;

// ---------------------------------------------------------------------------
// Attachment record
// ---------------------------------------------------------------------------

/// One volume currently attached to this node, as reported by `qbd -l`.
///
/// Records are rebuilt from the tool's output on every query and never cached;
/// `(pool, name)` is the identity of the underlying volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRecord {
    /// External attachment id, normalized to decimal.
    pub id: String,
    /// Volume name, unique within `pool`.
    pub name: String,
    /// Pool the volume belongs to.
    pub pool: String,
    /// Local block device, e.g. `/dev/qbd3`.
    pub device: String,
    /// Read bandwidth limit in bytes per second.
    pub read_bps: i64,
    /// Write bandwidth limit in bytes per second.
    pub write_bps: i64,
    /// Read IOPS limit.
    pub read_iops: i64,
    /// Write IOPS limit.
    pub write_iops: i64,
}

impl AttachmentRecord {
    /// Whether this record belongs to `pool`/`volume`.
    pub fn is_volume(&self, pool: &str, volume: &str) -> bool {
        self.pool == pool && self.name == volume
    }
}

impl fmt::Display for AttachmentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (id {}) on {}", self.pool, self.name, self.id, self.device)
    }
}

// ---------------------------------------------------------------------------
// Transport protocol
// ---------------------------------------------------------------------------

/// Transport used by qbd to reach the storage cluster.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP.
    #[default]
    Tcp,
    /// RDMA.
    Rdma,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Rdma => "rdma",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = QbdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "rdma" => Ok(Self::Rdma),
            other => Err(QbdError::InvalidArgument(format!(
                "unknown protocol `{other}`, expected tcp or rdma"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Reject empty pool or volume names before anything is executed.
pub fn validate_volume(pool: &str, volume: &str) -> Result<(), QbdError> {
    if pool.is_empty() {
        return Err(QbdError::invalid_argument("pool name is empty"));
    }
    if volume.is_empty() {
        return Err(QbdError::invalid_argument("volume name is empty"));
    }
    Ok(())
}

/// Render the `<protocol>://<pool>/<volume>` target understood by `qbd -m/-u`.
pub fn volume_url(protocol: Protocol, pool: &str, volume: &str) -> String {
    format!("{protocol}://{pool}/{volume}")
}
