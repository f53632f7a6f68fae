//! The durable, append-mostly log store.
//!
//! One table holds the whole ledger: every replicated state-machine
//! command as a numbered, termed, compressed row, plus a reserved row at
//! `log_index = -1` for consensus persistent state. An in-memory index
//! (`next_index`, `last_index`, `last_term`, `last_applied`, and the set of
//! live federated indexes) is rebuilt from the table at startup and kept
//! current under a single coarse mutex that serializes every mutating
//! operation.
//!
//! ## Write path
//!
//! ```text
//! exec_wr ──▶ append (mutex) ──▶ consensus.replicate ──▶ wait ──▶ apply (mutex)
//! ```
//!
//! The mutex is released while the caller blocks on the replication
//! rendezvous, so followers keep replicating concurrently with a leader's
//! wait. Apply walks committed-but-unapplied entries strictly in order and
//! stamps each row's timestamp after its command executes.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use backend::SqlBackend;
use common::{now_secs, Config, StoreError, StoreResult};
use tracing::{debug, error, warn};

use crate::codec;
use crate::consensus::{ConsensusHandle, ReplicaRequest};
use crate::record::{LogRecord, FED_NONE, RESERVED_INDEX, RESERVED_TERM};

/// In-memory index over the durable table. All fields are maintained under
/// the store mutex; see the invariants on [`LogStore`].
#[derive(Debug)]
struct IndexState {
    /// Next `log_index` to assign; always `last_index + 1`.
    next_index: i64,
    /// Highest `log_index` present.
    last_index: i64,
    /// Term of the record at `last_index`.
    last_term: i64,
    /// Highest applied index; every index at or below it is applied.
    last_applied: i64,
    /// Every `fed_index` currently stored, excluding `FED_NONE`.
    fed_set: BTreeSet<i64>,
}

/// The persistent log store of the replicated configuration database.
///
/// Between operations the store maintains:
/// - `0 <= last_applied <= last_index`, `next_index == last_index + 1`
/// - exactly one record per index in `[0, last_index]` (until retention
///   trims the applied prefix)
/// - `timestamp > 0` exactly for the applied prefix
/// - `fed_set` equal to the stored non-`-1` federated indexes
pub struct LogStore {
    db: Arc<dyn SqlBackend>,
    config: Config,
    state: Mutex<IndexState>,
    consensus: OnceLock<Arc<dyn ConsensusHandle>>,
}

impl LogStore {
    /// Open the store over `db`: create the schema if missing, install the
    /// index-0 sentinel on first boot, and rebuild the in-memory index from
    /// the table.
    pub fn open(db: Arc<dyn SqlBackend>, config: Config) -> StoreResult<Self> {
        let store = Self {
            db,
            config,
            state: Mutex::new(IndexState {
                next_index: 0,
                last_index: -1,
                last_term: -1,
                last_applied: -1,
                fed_set: BTreeSet::new(),
            }),
            consensus: OnceLock::new(),
        };

        store.bootstrap()?;

        if store.get_log_record(0).is_err() {
            // First boot: anchor predecessor lookups with a sentinel whose
            // payload is the boot time.
            let now = now_secs();
            store.insert_log_record(0, 0, &now.to_string(), now, FED_NONE)?;
        }

        store.setup_index()?;
        Ok(store)
    }

    /// Inject the consensus capability handle. Called once during startup
    /// wiring; solo deployments never call it.
    pub fn attach_consensus(&self, consensus: Arc<dyn ConsensusHandle>) {
        if self.consensus.set(consensus).is_err() {
            warn!("consensus handle already attached, ignoring");
        }
    }

    fn bootstrap(&self) -> StoreResult<()> {
        self.db.exec_local_write(
            "CREATE TABLE IF NOT EXISTS logdb (log_index INTEGER PRIMARY KEY, \
             term INTEGER, sqlcmd TEXT, timestamp INTEGER, fed_index INTEGER)",
        )?;
        self.db
            .exec_local_write("CREATE INDEX IF NOT EXISTS fed_index_idx ON logdb (fed_index)")?;
        self.db
            .exec_local_write("CREATE INDEX IF NOT EXISTS timestamp_idx ON logdb (timestamp)")?;
        Ok(())
    }

    /// Rebuild the in-memory index from the table.
    fn setup_index(&self) -> StoreResult<()> {
        let last_index = self
            .select_i64("SELECT MAX(log_index) FROM logdb")?
            .unwrap_or(-1);
        let last_applied = self
            .select_i64("SELECT MAX(log_index) FROM logdb WHERE timestamp != 0")?
            .unwrap_or(-1);
        let last_term = self.get_log_record(last_index)?.term;
        let fed_set = self.scan_fed_indices()?;

        let mut state = self.state();
        state.last_index = last_index;
        state.next_index = last_index + 1;
        state.last_applied = last_applied;
        state.last_term = last_term;
        state.fed_set = fed_set;

        debug!(
            last_index,
            last_applied, last_term, "log store index rebuilt"
        );
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Fetch the record at `index` together with its predecessor's
    /// `(index, term)`. Index 0 is its own predecessor.
    pub fn get_log_record(&self, index: i64) -> StoreResult<LogRecord> {
        let prev_index = if index == 0 { 0 } else { index - 1 };
        let stmt = format!(
            "SELECT c.log_index, c.term, c.sqlcmd, c.timestamp, c.fed_index, \
             p.log_index, p.term FROM logdb c, logdb p \
             WHERE c.log_index = {index} AND p.log_index = {prev_index}"
        );

        let mut raw: Option<Vec<Option<String>>> = None;
        self.db.exec_read(&stmt, &mut |row| {
            raw = Some(row.to_vec());
            Ok(())
        })?;

        let row = raw.ok_or(StoreError::NotFound)?;
        LogRecord::from_row(&row)
    }

    /// The `(index, term)` of the newest record, for heartbeats.
    pub fn get_last_record_index(&self) -> (i64, i64) {
        let state = self.state();
        (state.last_index, state.last_term)
    }

    /// Highest index applied to the state machine.
    pub fn last_applied(&self) -> i64 {
        self.state().last_applied
    }

    /// Next index the leader path would assign.
    pub fn next_index(&self) -> i64 {
        self.state().next_index
    }

    // ---------------------------------------------------------------------
    // Write coordinator
    // ---------------------------------------------------------------------

    /// The sole mutating entry point for ordinary callers.
    ///
    /// `fed_index` selects the federated behavior: `FED_NONE` for a plain
    /// entry, `0` to assign the entry's own log index as its federated
    /// index (origin-zone write), any other value to preserve an
    /// upstream-assigned federated index (peer-zone replay).
    ///
    /// On `Ok`, a quorum holds the entry, and the entry and every prior
    /// entry are applied locally.
    pub fn exec_wr(&self, cmd: &str, fed_index: i64) -> StoreResult<()> {
        // Standalone master: no consensus involvement.
        if self.config.solo {
            self.db.exec_write(cmd)?;
            if self.config.federation_enabled {
                self.append(0, cmd, now_secs(), fed_index)?;
            }
            return Ok(());
        }

        let consensus = match self.consensus.get() {
            Some(consensus) if consensus.is_leader() => Arc::clone(consensus),
            _ => {
                error!("tried to modify the database while a follower");
                return Err(StoreError::NotLeader);
            }
        };

        let index = self.append(consensus.current_term(), cmd, 0, fed_index)?;

        let request = ReplicaRequest::new(index);
        consensus.replicate(Arc::clone(&request));
        let outcome = request.wait();

        // Re-check before applying: a demoted leader must not advance the
        // state machine on its own authority.
        if !consensus.is_leader() {
            error!(index, "not applying log record, this node is now a follower");
            return Err(StoreError::LostLeadership);
        }

        if !outcome.replicated {
            error!(
                index,
                "cannot replicate log record on followers: {}", outcome.message
            );
            return Err(StoreError::Replication(outcome.message));
        }

        self.apply_log_records(index)
    }

    /// Origin-zone federated write: the entry's federated index becomes its
    /// log index.
    pub fn exec_federated_wr(&self, cmd: &str) -> StoreResult<()> {
        self.exec_wr(cmd, 0)
    }

    /// Peer-zone federated replay: record a command while preserving its
    /// origin-assigned federated index.
    pub fn exec_federated_wr_at(&self, cmd: &str, fed_index: i64) -> StoreResult<()> {
        self.exec_wr(cmd, fed_index)
    }

    /// Allocate the next index and insert. Leader and solo path.
    fn append(&self, term: i64, cmd: &str, timestamp: i64, fed_index: i64) -> StoreResult<i64> {
        let mut state = self.state();

        let index = state.next_index;
        let stored_fed = if fed_index == 0 { index } else { fed_index };

        self.insert(index, term, cmd, timestamp, stored_fed)
            .map_err(|e| {
                error!(index, "cannot insert log record: {e}");
                e
            })?;

        state.last_index = index;
        state.last_term = term;
        state.next_index += 1;
        if fed_index != FED_NONE {
            state.fed_set.insert(stored_fed);
        }

        Ok(index)
    }

    /// Insert a record at an explicit index. Called by the consensus module
    /// on the follower side with entries from AppendEntries; also installs
    /// the sentinel at first boot.
    ///
    /// AppendEntries may retransmit already-known entries, so the cache is
    /// only advanced when `index` extends the log.
    pub fn insert_log_record(
        &self,
        index: i64,
        term: i64,
        cmd: &str,
        timestamp: i64,
        fed_index: i64,
    ) -> StoreResult<()> {
        let mut state = self.state();

        self.insert(index, term, cmd, timestamp, fed_index)?;

        if index > state.last_index {
            state.last_index = index;
            state.last_term = term;
            state.next_index = index + 1;
        }
        if fed_index != FED_NONE {
            state.fed_set.insert(fed_index);
        }
        Ok(())
    }

    /// Compress, escape, and insert one row. A primary-key conflict caused
    /// by a leader retry (client-visible timeout, then resend) re-reads the
    /// existing row and is a no-op when the content matches.
    fn insert(
        &self,
        index: i64,
        term: i64,
        cmd: &str,
        timestamp: i64,
        fed_index: i64,
    ) -> StoreResult<()> {
        let packed = codec::compress(cmd)?;
        let escaped = self.db.escape(&packed);
        let stmt = format!(
            "INSERT INTO logdb (log_index, term, sqlcmd, timestamp, fed_index) \
             VALUES ({index}, {term}, '{escaped}', {timestamp}, {fed_index})"
        );

        if let Err(insert_err) = self.db.exec_write(&stmt) {
            return match self.get_log_record(index) {
                Ok(existing) if existing.term == term && existing.payload == cmd => {
                    warn!(index, "duplicated log record");
                    Ok(())
                }
                Ok(_) => Err(StoreError::Conflict(format!(
                    "log index {index} already holds a different record"
                ))),
                Err(_) => Err(insert_err),
            };
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Apply engine
    // ---------------------------------------------------------------------

    /// Execute every committed-but-unapplied record up to `commit_index`,
    /// in strict index order, stamping each row's timestamp on success.
    /// Called by the write coordinator after quorum and by the consensus
    /// module when the commit index advances.
    ///
    /// A crash between executing a payload and stamping its timestamp makes
    /// recovery re-execute that payload: commands must be idempotent, or
    /// the state machine must tolerate replay.
    pub fn apply_log_records(&self, commit_index: i64) -> StoreResult<()> {
        let mut state = self.state();

        while state.last_applied < commit_index {
            let record = self.get_log_record(state.last_applied + 1)?;
            self.apply_record(&record)?;
            state.last_applied = record.index;
        }
        Ok(())
    }

    fn apply_record(&self, record: &LogRecord) -> StoreResult<()> {
        self.db.exec_write(&record.payload)?;

        let stamp = format!(
            "UPDATE logdb SET timestamp = {} WHERE log_index = {} AND timestamp = 0",
            now_secs(),
            record.index
        );
        // The state-machine write is not rolled back on a stamp failure;
        // recovery re-executes the payload (see apply_log_records).
        if let Err(e) = self.db.exec_write(&stamp) {
            error!(index = record.index, "cannot update log record: {e}");
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Truncation and retention
    // ---------------------------------------------------------------------

    /// Delete every record with `log_index >= start_index`. Used by the
    /// consensus module when a follower's tail conflicts with the leader.
    pub fn delete_log_records(&self, start_index: i64) -> StoreResult<()> {
        let mut state = self.state();

        self.db
            .exec_write(&format!("DELETE FROM logdb WHERE log_index >= {start_index}"))?;

        state.next_index = start_index;
        state.last_index = start_index - 1;
        if let Ok(record) = self.get_log_record(state.last_index) {
            state.last_term = record.term;
        }
        if state.last_applied > state.last_index {
            state.last_applied = state.last_index;
        }
        state.fed_set = self.scan_fed_indices()?;
        Ok(())
    }

    /// Remove applied records older than the retention window, keeping the
    /// newest `log_retention` applied records, everything unapplied, and
    /// the reserved slot. Returns the number of rows deleted. Invoked by a
    /// periodic timer.
    pub fn purge_log(&self) -> StoreResult<usize> {
        let mut state = self.state();
        let retention = self.config.log_retention as i64;

        if state.last_index < retention {
            return Ok(0);
        }

        let horizon = state.last_applied - retention;
        let deleted = self.db.exec_write(&format!(
            "DELETE FROM logdb WHERE timestamp > 0 AND log_index >= 0 AND log_index < {horizon}"
        ))?;

        if deleted > 0 {
            debug!(deleted, horizon, "purged applied log records");
            state.fed_set = self.scan_fed_indices()?;
        }
        Ok(deleted)
    }

    // ---------------------------------------------------------------------
    // Federated index
    // ---------------------------------------------------------------------

    /// All federated indexes currently stored, sorted.
    pub fn scan_fed_indices(&self) -> StoreResult<BTreeSet<i64>> {
        let mut set = BTreeSet::new();
        self.db.exec_read(
            "SELECT fed_index FROM logdb WHERE fed_index != -1",
            &mut |row| {
                if let Some(Some(text)) = row.first() {
                    let fed = text.parse::<i64>().map_err(|_| {
                        StoreError::Decode(format!("fed_index is not an integer: {text}"))
                    })?;
                    set.insert(fed);
                }
                Ok(())
            },
        )?;
        Ok(set)
    }

    /// Highest federated index, or `FED_NONE` when the stream is empty.
    pub fn last_federated(&self) -> i64 {
        self.state()
            .fed_set
            .iter()
            .next_back()
            .copied()
            .unwrap_or(FED_NONE)
    }

    /// Strict predecessor of `index` in the federated stream, or `FED_NONE`.
    pub fn previous_federated(&self, index: i64) -> i64 {
        self.state()
            .fed_set
            .range(..index)
            .next_back()
            .copied()
            .unwrap_or(FED_NONE)
    }

    /// Strict successor of `index` in the federated stream, or `FED_NONE`.
    pub fn next_federated(&self, index: i64) -> i64 {
        self.state()
            .fed_set
            .range((Bound::Excluded(index), Bound::Unbounded))
            .next()
            .copied()
            .unwrap_or(FED_NONE)
    }

    // ---------------------------------------------------------------------
    // Consensus persistent state (the reserved slot)
    // ---------------------------------------------------------------------

    /// Read the consensus persistent state blob.
    pub fn get_raft_state(&self) -> StoreResult<String> {
        let stmt = format!(
            "SELECT sqlcmd FROM logdb WHERE log_index = {RESERVED_INDEX} AND term = {RESERVED_TERM}"
        );
        let mut blob: Option<String> = None;
        self.db.exec_read(&stmt, &mut |row| {
            if let Some(Some(text)) = row.first() {
                blob = Some(text.clone());
            }
            Ok(())
        })?;

        match blob {
            Some(state) if !state.is_empty() => Ok(state),
            _ => Err(StoreError::NotFound),
        }
    }

    /// Write the consensus persistent state blob. Not compressed, not
    /// logged, not replicated; the slot is created on first write so it is
    /// always absent-or-unique.
    pub fn update_raft_state(&self, raft_state: &str) -> StoreResult<()> {
        // Two statements; keep other writers out.
        let _state = self.state();

        let escaped = self.db.escape(raft_state);
        let updated = self.db.exec_write(&format!(
            "UPDATE logdb SET sqlcmd = '{escaped}' \
             WHERE log_index = {RESERVED_INDEX} AND term = {RESERVED_TERM}"
        ))?;

        if updated == 0 {
            self.db.exec_write(&format!(
                "INSERT INTO logdb (log_index, term, sqlcmd, timestamp, fed_index) \
                 VALUES ({RESERVED_INDEX}, {RESERVED_TERM}, '{escaped}', 0, {FED_NONE})"
            ))?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select_i64(&self, stmt: &str) -> StoreResult<Option<i64>> {
        let mut value = None;
        self.db.exec_read(stmt, &mut |row| {
            if let Some(Some(text)) = row.first() {
                value = text.parse::<i64>().ok();
            }
            Ok(())
        })?;
        Ok(value)
    }
}
