//! Write façade for cross-cluster (federated) callers.

use std::sync::Arc;

use common::StoreResult;

use crate::consensus::FedReplicator;
use crate::store::LogStore;

/// Entry point for writes that originate in this zone and must fan out to
/// peer zones: record the command in the main log's federated stream, then
/// hand it to the federated replicator.
pub struct FedLogStore {
    log: Arc<LogStore>,
    replicator: Arc<dyn FedReplicator>,
}

impl FedLogStore {
    pub fn new(log: Arc<LogStore>, replicator: Arc<dyn FedReplicator>) -> Self {
        Self { log, replicator }
    }

    /// Execute a federated write. The replicator is only invoked once the
    /// command is durably recorded upstream.
    pub fn exec_wr(&self, cmd: &str) -> StoreResult<()> {
        self.log.exec_federated_wr(cmd)?;
        self.replicator.replicate(cmd);
        Ok(())
    }
}
