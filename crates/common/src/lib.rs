
use serde::{Deserialize, Serialize};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Canonical error type shared across the log store subsystems.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend: {0}")]
    Backend(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("not the leader")]
    NotLeader,
    #[error("leadership lost while replicating")]
    LostLeadership,
    #[error("replication: {0}")]
    Replication(String),
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `StoreError`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Runtime configuration for the log store.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .solo(false)
///     .log_retention(100_000)
///     .federation_enabled(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Standalone master: writes go straight to the backend, no consensus.
    #[builder(default = false)]
    pub solo: bool,
    /// Minimum number of applied records kept around after compaction.
    #[builder(default = 500_000)]
    pub log_retention: u64,
    /// Whether writes are also recorded in the federated stream.
    #[builder(default = false)]
    pub federation_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solo: false,
            log_retention: 500_000,
            federation_enabled: false,
        }
    }
}

/// Wall-clock seconds since the Unix epoch.
///
/// Used for apply timestamps; a pre-epoch clock reads as 0 rather than
/// failing the write path.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{now_secs, Config, StoreError, StoreResult};
}
