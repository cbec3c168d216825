//! Volume-level attach/detach on top of the [`CommandDriver`].
//!
//! The attachment state lives entirely in qbd's process table.  Every query
//! here lists it afresh, parses it with [`crate::table`], and keeps nothing
//! between calls.
//!
//! # Concurrency
//!
//! Nothing is locked.  Two callers attaching or detaching the same volume at
//! the same time race inside qbd; callers that need one operation per volume
//! at a time must serialize themselves.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::config::QbdConfig;
use crate::driver::CommandDriver;
use crate::error::QbdError;
use crate::exec::CommandExecutor;
use crate::table::parse_table;
use crate::types::{AttachmentRecord, Protocol, validate_volume};

/// Attaches, detaches and inspects qbd volumes.
#[derive(Debug, Clone)]
pub struct AttachmentReconciler<E> {
    driver: CommandDriver<E>,
    device_dir: PathBuf,
}

impl<E: CommandExecutor> AttachmentReconciler<E> {
    pub fn new(executor: E, config: &QbdConfig) -> Self {
        Self {
            driver: CommandDriver::new(executor, config),
            device_dir: config.device_dir.clone(),
        }
    }

    pub fn driver(&self) -> &CommandDriver<E> {
        &self.driver
    }

    /// Every attachment qbd reports for `config_file`.
    ///
    /// Rows that fail to parse are dropped; the header is skipped.
    pub fn list_all(&self, config_file: &Path) -> Result<Vec<AttachmentRecord>, QbdError> {
        let output = self.driver.invoke_list(config_file).inspect_err(|e| {
            warn!(config_file = %config_file.display(), error = %e, "list attached volumes failed");
        })?;
        Ok(parse_table(&output, &self.device_dir))
    }

    /// The attachment of `pool`/`volume`, if any.
    ///
    /// Returns `Ok(None)` when the volume is not attached and
    /// [`QbdError::DuplicateAttachment`] when qbd reports it more than once.
    #[instrument(skip(self, config_file))]
    pub fn list_attached(
        &self,
        config_file: &Path,
        pool: &str,
        volume: &str,
    ) -> Result<Option<AttachmentRecord>, QbdError> {
        validate_volume(pool, volume)?;

        let mut matches: Vec<AttachmentRecord> = self
            .list_all(config_file)?
            .into_iter()
            .filter(|record| record.is_volume(pool, volume))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(QbdError::DuplicateAttachment {
                pool: pool.to_owned(),
                volume: volume.to_owned(),
                matches,
            }),
        }
    }

    /// Local device of `pool`/`volume`, or `None` when it is not attached.
    pub fn resolve_device(
        &self,
        config_file: &Path,
        pool: &str,
        volume: &str,
    ) -> Result<Option<String>, QbdError> {
        Ok(self
            .list_attached(config_file, pool, volume)?
            .map(|record| record.device)
            .filter(|device| !device.is_empty()))
    }

    /// Map `pool`/`volume`, confirm its device, and probe it.
    ///
    /// Returns the device path.  A failed map is returned unchanged with no
    /// cleanup.  A map that leaves no device, or a device that fails the read
    /// probe, is [`QbdError::AttachmentNotConfirmed`]; the volume is left
    /// mapped and the caller decides whether to detach.
    #[instrument(skip(self, config_file))]
    pub fn attach(
        &self,
        config_file: &Path,
        protocol: Protocol,
        pool: &str,
        volume: &str,
    ) -> Result<String, QbdError> {
        validate_volume(pool, volume)?;
        self.driver.invoke_attach(config_file, protocol, pool, volume)?;

        let device = self
            .resolve_device(config_file, pool, volume)?
            .ok_or_else(|| {
                QbdError::AttachmentNotConfirmed(format!(
                    "device name is empty after attach of {pool}/{volume}"
                ))
            })?;

        self.driver.invoke_read_probe(&device)?;

        info!(%device, "volume attached");
        Ok(device)
    }

    /// Unmap `pool`/`volume`.
    ///
    /// qbd's answer is taken at face value; the table is not consulted
    /// afterwards.
    #[instrument(skip(self, config_file))]
    pub fn detach(
        &self,
        config_file: &Path,
        protocol: Protocol,
        pool: &str,
        volume: &str,
    ) -> Result<(), QbdError> {
        validate_volume(pool, volume)?;
        self.driver.invoke_detach(config_file, protocol, pool, volume)?;
        info!("volume detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::exec::testing::ScriptedExecutor;

    const CONF: &str = "/etc/neonsan/qbd.conf";
    const HEADER: &str = "No id device volume config read_bps write_bps read_iops write_iops";

    fn reconciler(executor: ScriptedExecutor) -> AttachmentReconciler<ScriptedExecutor> {
        AttachmentReconciler::new(executor, &QbdConfig::default())
    }

    fn conf() -> &'static Path {
        Path::new(CONF)
    }

    #[test]
    fn absent_volume_is_none() {
        let r = reconciler(ScriptedExecutor::with_table(
            "No id device volume\n0 1 qbd0 tcp://kube/other cfg 0 0 0 0\n",
        ));
        assert_eq!(r.list_attached(conf(), "kube", "pvc").unwrap(), None);
        assert_eq!(r.list_attached(conf(), "other-pool", "other").unwrap(), None);
    }

    #[test]
    fn single_match_is_returned() {
        let r = reconciler(ScriptedExecutor::with_table(
            "No id device volume\n\
             0 0x10 qbd0 tcp://kube/a cfg 1 2 3 4\n\
             1 7 qbd3 tcp://kube/pvc cfg 100 200 10 20\n",
        ));
        let rec = r.list_attached(conf(), "kube", "pvc").unwrap().unwrap();
        assert_eq!(
            rec,
            AttachmentRecord {
                id: "7".into(),
                name: "pvc".into(),
                pool: "kube".into(),
                device: "/dev/qbd3".into(),
                read_bps: 100,
                write_bps: 200,
                read_iops: 10,
                write_iops: 20,
            }
        );
    }

    #[test]
    fn duplicate_match_is_error() {
        let r = reconciler(ScriptedExecutor::with_table(
            "No id device volume\n\
             0 1 qbd0 tcp://kube/pvc cfg 0 0 0 0\n\
             1 2 qbd1 rdma://kube/pvc cfg 0 0 0 0\n",
        ));
        match r.list_attached(conf(), "kube", "pvc") {
            Err(QbdError::DuplicateAttachment { matches, .. }) => {
                let devices: Vec<&str> = matches.iter().map(|m| m.device.as_str()).collect();
                assert_eq!(devices, vec!["/dev/qbd0", "/dev/qbd1"]);
            }
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_row_does_not_hide_later_rows() {
        let r = reconciler(ScriptedExecutor::with_table(
            "No id device volume\n\
             0 1 qbd0 tcp://kube/pvc cfg fast 0 0 0\n\
             1 2 qbd1 tcp://kube/pvc cfg 5 0 0 0\n",
        ));
        let rec = r.list_attached(conf(), "kube", "pvc").unwrap().unwrap();
        assert_eq!(rec.device, "/dev/qbd1");
        assert_eq!(rec.read_bps, 5);
    }

    #[test]
    fn same_name_in_other_pool_is_distinct() {
        let r = reconciler(ScriptedExecutor::with_table(
            "No id device volume\n\
             0 1 qbd0 tcp://kube/pvc cfg 0 0 0 0\n\
             1 2 qbd1 tcp://backup/pvc cfg 0 0 0 0\n",
        ));
        let rec = r.list_attached(conf(), "backup", "pvc").unwrap().unwrap();
        assert_eq!(rec.device, "/dev/qbd1");
    }

    #[test]
    fn list_failure_propagates() {
        let r = reconciler(ScriptedExecutor::new(|_, _| {
            Err(QbdError::command("qbd -l", "exit code 1: not connected"))
        }));
        assert!(matches!(
            r.list_attached(conf(), "kube", "pvc"),
            Err(QbdError::ExternalCommand { .. })
        ));
    }

    #[test]
    fn list_all_returns_every_row() {
        let r = reconciler(ScriptedExecutor::with_table(
            "hdr\n0 1 qbd0 tcp://kube/a\n1 2 qbd1 tcp://kube/b\n",
        ));
        assert_eq!(r.list_all(conf()).unwrap().len(), 2);
    }

    #[test]
    fn resolve_device_of_absent_volume() {
        let r = reconciler(ScriptedExecutor::with_table(HEADER));
        assert_eq!(r.resolve_device(conf(), "kube", "pvc").unwrap(), None);
    }

    #[test]
    fn invalid_arguments_spawn_nothing() {
        let r = reconciler(ScriptedExecutor::with_table(HEADER));
        for (pool, volume) in [("", "pvc"), ("kube", "")] {
            assert!(matches!(
                r.attach(conf(), Protocol::Tcp, pool, volume),
                Err(QbdError::InvalidArgument(_))
            ));
            assert!(matches!(
                r.detach(conf(), Protocol::Tcp, pool, volume),
                Err(QbdError::InvalidArgument(_))
            ));
            assert!(matches!(
                r.list_attached(conf(), pool, volume),
                Err(QbdError::InvalidArgument(_))
            ));
        }
        assert!(r.driver().executor().calls().is_empty());
    }

    /// Executor that reports `pvc` attached only after `qbd -m` ran.
    fn attaching_executor(probe_ok: bool) -> ScriptedExecutor {
        let mapped = Arc::new(AtomicBool::new(false));
        ScriptedExecutor::new(move |program, args| {
            match (program, args.first().map(String::as_str)) {
                ("qbd", Some("-m")) => {
                    mapped.store(true, Ordering::SeqCst);
                    Ok(Vec::new())
                }
                ("qbd", Some("-l")) => {
                    let mut table = format!("{HEADER}\n");
                    if mapped.load(Ordering::SeqCst) {
                        table.push_str("0 3 qbd3 tcp://kube/pvc cfg 0 0 0 0\n");
                    }
                    Ok(table.into_bytes())
                }
                ("dd", _) if probe_ok => Ok(Vec::new()),
                ("dd", _) => Err(QbdError::command("dd", "exit code 1: Input/output error")),
                _ => Ok(Vec::new()),
            }
        })
    }

    #[test]
    fn attach_confirms_and_probes() {
        let r = reconciler(attaching_executor(true));
        let device = r.attach(conf(), Protocol::Tcp, "kube", "pvc").unwrap();
        assert_eq!(device, "/dev/qbd3");

        let exec = r.driver().executor();
        assert_eq!(exec.count("qbd", Some("-m")), 1);
        assert_eq!(exec.count("qbd", Some("-l")), 1);
        assert_eq!(exec.count("dd", None), 1);
        let probe = exec.calls().into_iter().find(|c| c.program == "dd").unwrap();
        assert_eq!(probe.args[0], "if=/dev/qbd3");

        let rec = r.list_attached(conf(), "kube", "pvc").unwrap().unwrap();
        assert!(!rec.device.is_empty());
    }

    #[test]
    fn failed_probe_fails_attach_without_detach() {
        let r = reconciler(attaching_executor(false));
        let err = r.attach(conf(), Protocol::Tcp, "kube", "pvc").unwrap_err();
        assert!(matches!(err, QbdError::AttachmentNotConfirmed(_)));

        let exec = r.driver().executor();
        assert_eq!(exec.count("dd", None), 1);
        assert_eq!(exec.count("qbd", Some("-u")), 0);
    }

    #[test]
    fn attach_without_device_is_not_confirmed() {
        let r = reconciler(ScriptedExecutor::with_table(HEADER));
        let err = r.attach(conf(), Protocol::Tcp, "kube", "pvc").unwrap_err();
        match err {
            QbdError::AttachmentNotConfirmed(msg) => {
                assert!(msg.contains("device name is empty after attach"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(r.driver().executor().count("dd", None), 0);
    }

    #[test]
    fn failed_map_returns_tool_error_only() {
        let r = reconciler(ScriptedExecutor::new(|_, args| {
            if args.first().map(String::as_str) == Some("-m") {
                Err(QbdError::command("qbd -m", "exit code 5: volume busy"))
            } else {
                Ok(Vec::new())
            }
        }));
        let err = r.attach(conf(), Protocol::Tcp, "kube", "pvc").unwrap_err();
        assert_eq!(err.to_string(), "command `qbd -m` failed: exit code 5: volume busy");
        assert_eq!(r.driver().executor().calls().len(), 1);
    }

    #[test]
    fn attach_surfaces_duplicates() {
        let r = reconciler(ScriptedExecutor::with_table(
            "hdr\n0 1 qbd0 tcp://kube/pvc\n1 2 qbd1 tcp://kube/pvc\n",
        ));
        assert!(matches!(
            r.attach(conf(), Protocol::Tcp, "kube", "pvc"),
            Err(QbdError::DuplicateAttachment { .. })
        ));
        assert_eq!(r.driver().executor().count("dd", None), 0);
    }

    #[test]
    fn detach_never_lists() {
        let r = reconciler(ScriptedExecutor::with_table(
            "hdr\n0 1 qbd0 tcp://kube/pvc\n1 2 qbd1 tcp://kube/pvc\n",
        ));
        r.detach(conf(), Protocol::Rdma, "kube", "pvc").unwrap();

        let calls = r.driver().executor().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[..2], ["-u", "rdma://kube/pvc"]);
    }
}
