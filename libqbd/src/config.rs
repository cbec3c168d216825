//! qbd runtime configuration.
//!
//! Controls which binaries are invoked, where attached devices appear, and how
//! the post-attach read probe is issued.
//!
//! Environment variables (all optional):
//! - `QBD_BINARY`: qbd control tool. Defaults to `qbd`.
//! - `QBD_DD_BINARY`: binary used for the read probe. Defaults to `dd`.
//! - `QBD_DEVICE_DIR`: directory device names are relative to. Defaults to `/dev`.
//! - `QBD_CONFIG_FILE`: qbd configuration file. Defaults to `/etc/neonsan/qbd.conf`.
//! - `QBD_PROTOCOL`: `tcp` or `rdma`. Defaults to `tcp`.
//! - `QBD_PROBE_BLOCK_SIZE`: `dd` block size for the probe. Defaults to `4k`.
//! - `QBD_PROBE_COUNT`: number of blocks the probe reads. Defaults to `1`.
//! - `QBD_EXEC_TIMEOUT_SECS`: kill external commands after this many seconds.
//!   Unset means no timeout.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::QbdError;
use crate::types::Protocol;

pub const DEFAULT_QBD_BINARY: &str = "qbd";
pub const DEFAULT_DD_BINARY: &str = "dd";
pub const DEFAULT_DEVICE_DIR: &str = "/dev";
pub const DEFAULT_CONFIG_FILE: &str = "/etc/neonsan/qbd.conf";

/// Parameters of the direct-I/O read issued against a freshly attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadProbe {
    /// `bs=` operand, e.g. `4k`.
    pub block_size: String,
    /// `count=` operand.
    pub count: u32,
}

impl Default for ReadProbe {
    fn default() -> Self {
        Self {
            block_size: "4k".to_owned(),
            count: 1,
        }
    }
}

/// Configuration shared by the driver and the reconciler.
///
/// This is a plain value handed to constructors; nothing in the crate keeps a
/// global copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QbdConfig {
    pub qbd_binary: String,
    pub dd_binary: String,
    pub device_dir: PathBuf,
    /// qbd configuration file used when the caller does not name one.
    pub config_file: PathBuf,
    /// Protocol used when the caller does not name one.
    pub protocol: Protocol,
    pub probe: ReadProbe,
    pub exec_timeout: Option<Duration>,
}

impl Default for QbdConfig {
    fn default() -> Self {
        Self {
            qbd_binary: DEFAULT_QBD_BINARY.to_owned(),
            dd_binary: DEFAULT_DD_BINARY.to_owned(),
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            protocol: Protocol::default(),
            probe: ReadProbe::default(),
            exec_timeout: None,
        }
    }
}

impl QbdConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, QbdError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, starting from the
    /// defaults.  Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, QbdError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("QBD_BINARY") {
            config.qbd_binary = v;
        }
        if let Some(v) = get("QBD_DD_BINARY") {
            config.dd_binary = v;
        }
        if let Some(v) = get("QBD_DEVICE_DIR") {
            config.device_dir = PathBuf::from(v);
        }
        if let Some(v) = get("QBD_CONFIG_FILE") {
            config.config_file = PathBuf::from(v);
        }
        if let Some(v) = get("QBD_PROTOCOL") {
            config.protocol = v
                .parse()
                .map_err(|e| QbdError::config(format!("QBD_PROTOCOL: {e}")))?;
        }
        if let Some(v) = get("QBD_PROBE_BLOCK_SIZE") {
            config.probe.block_size = v.trim().to_owned();
        }
        if let Some(v) = get("QBD_PROBE_COUNT") {
            let count: u32 = v
                .trim()
                .parse()
                .map_err(|e| QbdError::config(format!("QBD_PROBE_COUNT `{v}`: {e}")))?;
            if count == 0 {
                return Err(QbdError::config("QBD_PROBE_COUNT must be at least 1"));
            }
            config.probe.count = count;
        }
        if let Some(v) = get("QBD_EXEC_TIMEOUT_SECS") {
            let secs: u64 = v
                .trim()
                .parse()
                .map_err(|e| QbdError::config(format!("QBD_EXEC_TIMEOUT_SECS `{v}`: {e}")))?;
            config.exec_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}
