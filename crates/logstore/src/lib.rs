//! Persistent log store for a replicated configuration database.
//!
//! This crate is the durable ledger a Raft-style cluster rebuilds its
//! relational state machine from. Every mutating command is serialized as a
//! numbered, termed, compressed log entry; a consensus module (consumed
//! through a narrow trait) replicates entries to a quorum before they are
//! applied; a parallel federated index feeds a second, cross-cluster
//! replication layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            LogStore                              │
//! │  ┌───────────┐   ┌────────────────┐   ┌───────────────────────┐  │
//! │  │  exec_wr  │──▶│ append (mutex) │──▶│ ConsensusHandle       │  │
//! │  │ (leader)  │   │                │   │ .replicate(request)   │  │
//! │  └───────────┘   └────────────────┘   └───────────┬───────────┘  │
//! │        ▲                                          │ quorum       │
//! │        │          ┌────────────────┐              ▼              │
//! │  ┌───────────┐    │ apply engine   │◀── request.wait() ──────────│
//! │  │FedLogStore│    │ (mutex, order) │                             │
//! │  └───────────┘    └───────┬────────┘                             │
//! │                           ▼                                      │
//! │                   ┌────────────────┐                             │
//! │                   │  SqlBackend    │  logdb(log_index, term,     │
//! │                   │  (adapter)     │  sqlcmd, timestamp,         │
//! │                   └────────────────┘  fed_index)                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`codec`]: zlib + base64 payload compression
//! - [`record`]: the durable row shape and reserved values
//! - [`consensus`]: capability traits and the replication rendezvous
//! - [`store`]: the log store proper (append, apply, truncate, retention)
//! - [`fed`]: the federated write façade
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use backend::SqliteBackend;
//! use common::Config;
//! use logstore::{LogStore, FED_NONE};
//!
//! # fn main() -> common::StoreResult<()> {
//! let db = Arc::new(SqliteBackend::open("zone.db")?);
//! let config = Config::builder().solo(true).build();
//! let store = LogStore::open(db, config)?;
//!
//! store.exec_wr("UPDATE pool SET body = 'x' WHERE oid = 1", FED_NONE)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod consensus;
pub mod fed;
pub mod record;
pub mod store;


pub use consensus::{ConsensusHandle, FedReplicator, ReplicaOutcome, ReplicaRequest};
pub use fed::FedLogStore;
pub use record::{LogRecord, FED_NONE, RESERVED_INDEX, RESERVED_TERM};
pub use store::LogStore;
