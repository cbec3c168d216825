//! Volumes of a single NeonSAN pool.
//!
//! [`PoolVolumes`] pins the qbd configuration file, protocol and pool so
//! callers that only ever deal with one pool can address volumes by name.

use std::path::{Path, PathBuf};

use crate::config::QbdConfig;
use crate::error::QbdError;
use crate::exec::CommandExecutor;
use crate::reconciler::AttachmentReconciler;
use crate::types::{AttachmentRecord, Protocol};

/// Attachment operations bound to one pool.
#[derive(Debug, Clone)]
pub struct PoolVolumes<E> {
    reconciler: AttachmentReconciler<E>,
    config_file: PathBuf,
    protocol: Protocol,
    pool: String,
}

impl<E: CommandExecutor> PoolVolumes<E> {
    /// Bind `pool` using the qbd configuration file and protocol from `config`.
    ///
    /// Fails with [`QbdError::InvalidArgument`] when `pool` is empty.
    pub fn new(executor: E, config: &QbdConfig, pool: impl Into<String>) -> Result<Self, QbdError> {
        let pool = pool.into();
        if pool.is_empty() {
            return Err(QbdError::invalid_argument("pool name is empty"));
        }
        Ok(Self {
            reconciler: AttachmentReconciler::new(executor, config),
            config_file: config.config_file.clone(),
            protocol: config.protocol,
            pool,
        })
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn reconciler(&self) -> &AttachmentReconciler<E> {
        &self.reconciler
    }

    /// Attach `volume` and return its confirmed device path.
    pub fn attach(&self, volume: &str) -> Result<String, QbdError> {
        self.reconciler
            .attach(&self.config_file, self.protocol, &self.pool, volume)
    }

    pub fn detach(&self, volume: &str) -> Result<(), QbdError> {
        self.reconciler
            .detach(&self.config_file, self.protocol, &self.pool, volume)
    }

    /// Device of `volume`, `None` when it is not attached.
    pub fn device(&self, volume: &str) -> Result<Option<String>, QbdError> {
        self.reconciler
            .resolve_device(&self.config_file, &self.pool, volume)
    }

    /// Attachment record of `volume`, `None` when it is not attached.
    pub fn status(&self, volume: &str) -> Result<Option<AttachmentRecord>, QbdError> {
        self.reconciler
            .list_attached(&self.config_file, &self.pool, volume)
    }

    /// Whether `volume` is currently attached.
    pub fn is_attached(&self, volume: &str) -> Result<bool, QbdError> {
        Ok(self.status(volume)?.is_some())
    }

    /// Every attachment qbd reports for this pool.
    pub fn attached(&self) -> Result<Vec<AttachmentRecord>, QbdError> {
        Ok(self
            .reconciler
            .list_all(&self.config_file)?
            .into_iter()
            .filter(|record| record.pool == self.pool)
            .collect())
    }
}
