//! End-to-end scenarios: the write coordinator against a scripted consensus
//! module and a real SQLite backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use backend::{SqlBackend, SqliteBackend};
use common::{Config, StoreError};
use logstore::{
    ConsensusHandle, FedLogStore, FedReplicator, LogStore, ReplicaRequest, FED_NONE,
};

/// Scripted consensus: acknowledges each replication request from a
/// background thread after a fixed delay, with a preconfigured outcome.
struct ScriptedConsensus {
    term: i64,
    leader: Arc<AtomicBool>,
    ack: (bool, String),
    delay: Duration,
    /// Demote this node just before acknowledging, to exercise the
    /// post-wait leadership re-check.
    demote_before_ack: bool,
}

impl ScriptedConsensus {
    fn new(term: i64, ack: (bool, &str), demote_before_ack: bool) -> Arc<Self> {
        Arc::new(Self {
            term,
            leader: Arc::new(AtomicBool::new(true)),
            ack: (ack.0, ack.1.to_string()),
            delay: Duration::from_millis(50),
            demote_before_ack,
        })
    }

    fn leader(term: i64) -> Arc<Self> {
        Self::new(term, (true, ""), false)
    }

    fn failing(term: i64, message: &str) -> Arc<Self> {
        Self::new(term, (false, message), false)
    }

    fn demoting(term: i64) -> Arc<Self> {
        Self::new(term, (true, ""), true)
    }

    fn follower(term: i64) -> Arc<Self> {
        let consensus = Self::leader(term);
        consensus.leader.store(false, Ordering::SeqCst);
        consensus
    }
}

impl ConsensusHandle for ScriptedConsensus {
    fn current_term(&self) -> i64 {
        self.term
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn replicate(&self, request: Arc<ReplicaRequest>) {
        let (replicated, message) = self.ack.clone();
        let delay = self.delay;
        let leader = Arc::clone(&self.leader);
        let demote = self.demote_before_ack;

        thread::spawn(move || {
            thread::sleep(delay);
            if demote {
                leader.store(false, Ordering::SeqCst);
            }
            request.complete(replicated, message);
        });
    }
}

/// Federated replicator that records every fanned-out command.
#[derive(Default)]
struct RecordingReplicator {
    commands: Mutex<Vec<String>>,
}

impl FedReplicator for RecordingReplicator {
    fn replicate(&self, cmd: &str) {
        self.commands.lock().unwrap().push(cmd.to_string());
    }
}

fn cluster_store(consensus: Arc<ScriptedConsensus>) -> (Arc<SqliteBackend>, Arc<LogStore>) {
    let db = Arc::new(SqliteBackend::open_in_memory().unwrap());
    db.exec_local_write("CREATE TABLE t (x INTEGER)").unwrap();

    let store = Arc::new(LogStore::open(db.clone(), Config::default()).unwrap());
    store.attach_consensus(consensus);
    (db, store)
}

fn table_values(db: &SqliteBackend) -> Vec<String> {
    let mut values = Vec::new();
    db.exec_read("SELECT x FROM t ORDER BY x", &mut |row| {
        values.push(row[0].clone().unwrap());
        Ok(())
    })
    .unwrap();
    values
}

#[test]
fn leader_replicates_then_applies() {
    let (db, store) = cluster_store(ScriptedConsensus::leader(5));

    store.exec_wr("INSERT INTO t VALUES (1)", FED_NONE).unwrap();

    let record = store.get_log_record(1).unwrap();
    assert_eq!(record.term, 5);
    assert!(record.timestamp > 0);
    assert_eq!(store.get_last_record_index(), (1, 5));
    assert_eq!(store.last_applied(), 1);
    assert_eq!(table_values(&db), ["1"]);
}

#[test]
fn replication_failure_leaves_the_entry_unapplied() {
    let (db, store) = cluster_store(ScriptedConsensus::failing(5, "no quorum"));

    let err = store.exec_wr("INSERT INTO t VALUES (1)", FED_NONE).unwrap_err();
    match err {
        StoreError::Replication(message) => assert_eq!(message, "no quorum"),
        other => panic!("expected replication failure, got {other}"),
    }

    // The entry stays in the local log, unapplied; a later leader will
    // confirm or truncate it.
    let record = store.get_log_record(1).unwrap();
    assert_eq!(record.timestamp, 0);
    assert_eq!(store.last_applied(), 0);
    assert!(table_values(&db).is_empty());
}

#[test]
fn leadership_loss_during_the_wait_aborts_the_apply() {
    let (db, store) = cluster_store(ScriptedConsensus::demoting(5));

    let err = store.exec_wr("INSERT INTO t VALUES (1)", FED_NONE).unwrap_err();
    assert!(matches!(err, StoreError::LostLeadership));

    assert_eq!(store.get_log_record(1).unwrap().timestamp, 0);
    assert_eq!(store.last_applied(), 0);
    assert!(table_values(&db).is_empty());
}

#[test]
fn follower_mode_rejects_writes() {
    let (db, store) = cluster_store(ScriptedConsensus::follower(5));

    let err = store.exec_wr("INSERT INTO t VALUES (1)", FED_NONE).unwrap_err();
    assert!(matches!(err, StoreError::NotLeader));
    assert_eq!(store.get_last_record_index(), (0, 0));
    assert!(table_values(&db).is_empty());
}

#[test]
fn concurrent_leader_writes_all_commit_and_apply() {
    let (db, store) = cluster_store(ScriptedConsensus::leader(2));

    let writers: Vec<_> = (1..=4)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.exec_wr(&format!("INSERT INTO t VALUES ({i})"), FED_NONE))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }

    // Four distinct indices after the sentinel, all applied, regardless of
    // which wait resolved first.
    assert_eq!(store.get_last_record_index(), (4, 2));
    assert_eq!(store.last_applied(), 4);
    assert_eq!(table_values(&db), ["1", "2", "3", "4"]);
}

#[test]
fn federated_sub_store_records_then_fans_out() {
    let db = Arc::new(SqliteBackend::open_in_memory().unwrap());
    db.exec_local_write("CREATE TABLE t (x INTEGER)").unwrap();

    let store = Arc::new(
        LogStore::open(
            db.clone(),
            Config::builder().solo(true).federation_enabled(true).build(),
        )
        .unwrap(),
    );
    let replicator = Arc::new(RecordingReplicator::default());
    let fed = FedLogStore::new(Arc::clone(&store), replicator.clone());

    fed.exec_wr("INSERT INTO t VALUES (1)").unwrap();

    // Recorded in the main log with an assigned federated index, then
    // handed to the replicator.
    let record = store.get_log_record(1).unwrap();
    assert_eq!(record.fed_index, 1);
    assert_eq!(
        replicator.commands.lock().unwrap().as_slice(),
        ["INSERT INTO t VALUES (1)"]
    );
}

#[test]
fn federated_sub_store_does_not_fan_out_failed_writes() {
    let db = Arc::new(SqliteBackend::open_in_memory().unwrap());
    let store = Arc::new(LogStore::open(db, Config::default()).unwrap());

    let replicator = Arc::new(RecordingReplicator::default());
    let fed = FedLogStore::new(Arc::clone(&store), replicator.clone());

    // No consensus attached: the upstream write is rejected.
    let err = fed.exec_wr("INSERT INTO t VALUES (1)").unwrap_err();
    assert!(matches!(err, StoreError::NotLeader));
    assert!(replicator.commands.lock().unwrap().is_empty());
}

#[test]
fn peer_zone_replay_preserves_origin_fed_indices() {
    // Origin zone: three federated writes, fed indices assigned from log
    // indices.
    let origin_db = Arc::new(SqliteBackend::open_in_memory().unwrap());
    origin_db.exec_local_write("CREATE TABLE t (x INTEGER)").unwrap();
    let origin = LogStore::open(
        origin_db.clone(),
        Config::builder().solo(true).federation_enabled(true).build(),
    )
    .unwrap();

    for i in 1..=3 {
        origin
            .exec_wr(&format!("INSERT INTO t VALUES ({i})"), 0)
            .unwrap();
    }

    // Peer zone: walk the origin's federated stream and replay each entry,
    // preserving the origin-assigned index.
    let peer_db = Arc::new(SqliteBackend::open_in_memory().unwrap());
    peer_db.exec_local_write("CREATE TABLE t (x INTEGER)").unwrap();
    let peer = LogStore::open(
        peer_db.clone(),
        Config::builder().solo(true).federation_enabled(true).build(),
    )
    .unwrap();

    let mut cursor = FED_NONE;
    loop {
        let fed = origin.next_federated(cursor);
        if fed == FED_NONE {
            break;
        }
        let record = origin.get_log_record(fed).unwrap();
        peer.exec_federated_wr_at(&record.payload, record.fed_index)
            .unwrap();
        cursor = fed;
    }

    assert_eq!(peer.last_federated(), origin.last_federated());
    assert_eq!(peer.previous_federated(3), 2);
    assert_eq!(table_values(&peer_db), ["1", "2", "3"]);
}
