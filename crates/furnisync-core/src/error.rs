//! Errors surfaced by the synchronization core.

use crate::item::GroupKey;
use crate::task::Cancelled;
use crate::transport::TransportError;

/// Errors returned by long-running core operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Replication needed an item the inventory no longer has.
    #[error("no {name} ({key}) left to place after {placed} of {total} entries")]
    ReplicationShortfall {
        /// Group that ran out.
        key: GroupKey,
        /// Display name of the group.
        name: String,
        /// Entries placed before the failure.
        placed: usize,
        /// Entries in the capture.
        total: usize,
    },

    /// The operation was cancelled by a reset or a newer command.
    #[error("operation cancelled")]
    Cancelled,

    /// A background worker panicked.
    #[error("background worker '{0}' panicked")]
    WorkerPanicked(&'static str),

    /// The transport refused a request the operation depends on.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<Cancelled> for SyncError {
    fn from(_: Cancelled) -> Self {
        SyncError::Cancelled
    }
}
