//! Command driver: argument vectors for `qbd` and the read probe.
//!
//! Each `invoke_*` method spawns exactly one process through the configured
//! [`CommandExecutor`] and blocks until it exits.  Failures are returned as
//! reported by the executor; nothing here retries or interprets them.

use std::path::Path;

use tracing::debug;

use crate::config::{QbdConfig, ReadProbe};
use crate::error::QbdError;
use crate::exec::CommandExecutor;
use crate::types::{Protocol, validate_volume, volume_url};

/// `qbd -m <protocol>://<pool>/<volume> -c <config_file>`
pub fn attach_args(config_file: &Path, protocol: Protocol, pool: &str, volume: &str) -> Vec<String> {
    vec![
        "-m".to_owned(),
        volume_url(protocol, pool, volume),
        "-c".to_owned(),
        config_file.to_string_lossy().into_owned(),
    ]
}

/// `qbd -u <protocol>://<pool>/<volume> -c <config_file>`
pub fn detach_args(config_file: &Path, protocol: Protocol, pool: &str, volume: &str) -> Vec<String> {
    vec![
        "-u".to_owned(),
        volume_url(protocol, pool, volume),
        "-c".to_owned(),
        config_file.to_string_lossy().into_owned(),
    ]
}

/// `qbd -l -c <config_file>`
pub fn list_args(config_file: &Path) -> Vec<String> {
    vec![
        "-l".to_owned(),
        "-c".to_owned(),
        config_file.to_string_lossy().into_owned(),
    ]
}

/// `dd if=<device> of=/dev/null bs=<bs> count=<n> iflag=direct`
pub fn read_probe_args(device: &str, probe: &ReadProbe) -> Vec<String> {
    vec![
        format!("if={device}"),
        "of=/dev/null".to_owned(),
        format!("bs={}", probe.block_size),
        format!("count={}", probe.count),
        "iflag=direct".to_owned(),
    ]
}

/// Issues `qbd` and `dd` invocations through an executor.
#[derive(Debug, Clone)]
pub struct CommandDriver<E> {
    executor: E,
    qbd_binary: String,
    dd_binary: String,
    probe: ReadProbe,
}

impl<E: CommandExecutor> CommandDriver<E> {
    pub fn new(executor: E, config: &QbdConfig) -> Self {
        Self {
            executor,
            qbd_binary: config.qbd_binary.clone(),
            dd_binary: config.dd_binary.clone(),
            probe: config.probe.clone(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Ask qbd to map `pool`/`volume` onto this node.
    pub fn invoke_attach(
        &self,
        config_file: &Path,
        protocol: Protocol,
        pool: &str,
        volume: &str,
    ) -> Result<Vec<u8>, QbdError> {
        validate_volume(pool, volume)?;
        self.qbd(attach_args(config_file, protocol, pool, volume))
    }

    /// Ask qbd to unmap `pool`/`volume` from this node.
    pub fn invoke_detach(
        &self,
        config_file: &Path,
        protocol: Protocol,
        pool: &str,
        volume: &str,
    ) -> Result<Vec<u8>, QbdError> {
        validate_volume(pool, volume)?;
        self.qbd(detach_args(config_file, protocol, pool, volume))
    }

    /// Fetch the full attachment table for `config_file`, unfiltered.
    pub fn invoke_list(&self, config_file: &Path) -> Result<String, QbdError> {
        let output = self.qbd(list_args(config_file))?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Read a few blocks from `device` with direct I/O, discarding the data.
    ///
    /// Any failure means the device is not usable and is reported as
    /// [`QbdError::AttachmentNotConfirmed`].
    pub fn invoke_read_probe(&self, device: &str) -> Result<(), QbdError> {
        let args = read_probe_args(device, &self.probe);
        debug!(program = %self.dd_binary, ?args, "probing device");
        self.executor
            .execute(&self.dd_binary, &args)
            .map(|_| ())
            .map_err(|e| {
                QbdError::AttachmentNotConfirmed(format!(
                    "device {device} not usable after attach: {e}"
                ))
            })
    }

    fn qbd(&self, args: Vec<String>) -> Result<Vec<u8>, QbdError> {
        debug!(program = %self.qbd_binary, ?args, "invoking qbd");
        self.executor.execute(&self.qbd_binary, &args)
    }
}
