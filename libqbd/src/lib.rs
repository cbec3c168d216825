//! # libqbd — NeonSAN volume attachment over the `qbd` tool
//!
//! `libqbd` attaches, detaches and inspects NeonSAN block volumes on the local
//! node by driving the `qbd` command-line tool.  Attachment state lives only
//! in qbd's own table; this crate lists and parses it on every query and
//! keeps nothing between calls.  It follows the RK8s conventions (`tracing`
//! for observability, `thiserror` for structured errors, `serde` data types).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | [`AttachmentRecord`], [`Protocol`], argument validation. |
//! | [`error`] | [`QbdError`] enum covering all failure modes. |
//! | [`config`] | [`QbdConfig`]: binaries, device directory, probe, timeout. |
//! | [`exec`] | [`CommandExecutor`] seam and the [`SystemExecutor`]. |
//! | [`driver`] | [`CommandDriver`]: `qbd -m/-u/-l` and the `dd` read probe. |
//! | [`table`] | Parser for the `qbd -l` attachment table. |
//! | [`reconciler`] | [`AttachmentReconciler`]: attach, detach, list. |
//! | [`pool`] | [`PoolVolumes`]: the reconciler bound to one pool. |

pub mod config;
pub mod driver;
pub mod error;
pub mod exec;
pub mod pool;
pub mod reconciler;
pub mod table;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::QbdConfig;
pub use driver::CommandDriver;
pub use error::QbdError;
pub use exec::{CommandExecutor, SystemExecutor};
pub use pool::PoolVolumes;
pub use reconciler::AttachmentReconciler;
pub use types::*;
